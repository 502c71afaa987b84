#![allow(unused)]
/*!

Types/type aliases that abstract over the implementing backing type.

# Background and Motivation

A motivating example is the `IString` type, an interned string type. A number of external crates could provide
this functionality. This module redirects to whatever chosen implementation we want. To use the
[`string_cache` crate](https://crates.io/crates/string_cache), we just define `IString` as an alias for
`string_cache::DefaultAtom`:

```ignore
pub use string_cache::DefaultAtom as IString;
```

If we want to later change to the [`ustr` crate](https://crates.io/crates/ustr), we just define `IString` to be
an alias for `ustr::Ustr` instead.

*/

// region Hashing data structures
pub use std::collections::{HashMap, HashSet};
// endregion

// Logging. Every consumer reaches for `tracing` directly rather than a bespoke macro layer.
pub use tracing;

// Interned string. `DefaultAtom` gives a global cache usable across threads, which matters since
// value-ids and variable names are cloned freely throughout the compiler.
pub use string_cache::DefaultAtom as IString;
