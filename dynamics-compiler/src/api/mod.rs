/*!

The compiler's surface: the expression DAG node type, the cache that de-duplicates it, the
builder that walks a visual model into it, Godley-table translation, code generation, and the
textual renderers.

*/

pub mod node;
pub mod expression_cache;
pub mod dag_builder;
pub mod godley;
pub mod code_gen;
pub mod renderer;
