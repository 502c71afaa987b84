/*!

A lightweight substitute for implementing `Display`/`Debug` directly: types that need more than
one textual representation implement [`Formattable`] once and get `Display`/`Debug` for free via
[`impl_display_debug_for_formattable`], selecting a [`FormatStyle`] at the call site instead.

*/

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum FormatStyle {
  #[default]
  Default,
  Simple,
  Debug,
  /// LaTeX-flavored typeset math, used by [`crate::api::renderer`].
  Math,
  /// Procedural, MATLAB-style code, used by [`crate::api::renderer`].
  Code,
}

pub trait Formattable {
  fn repr(&self, out: &mut dyn std::fmt::Write, style: FormatStyle) -> std::fmt::Result;
}

#[macro_export]
macro_rules! impl_display_debug_for_formattable {
    ($t:ty) => {
        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                <$t as $crate::core::format::Formattable>::repr(self, f, $crate::core::format::FormatStyle::Default)
            }
        }
        impl std::fmt::Debug for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                <$t as $crate::core::format::Formattable>::repr(self, f, $crate::core::format::FormatStyle::Debug)
            }
        }
    };
}
pub use impl_display_debug_for_formattable;
