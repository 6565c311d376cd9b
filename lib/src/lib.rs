//! Typed dataflow graphs with nested subgraphs.
//!
//! Operators are applied to `Var`s inside a `Context`; control-flow operators
//! take their bodies as closures. A `Graph` names some vars as results and is
//! linearized into a `Model` on `emit`, which decides where every node lives
//! and which outer values each subgraph captures.

pub mod build;
pub mod context;
pub mod error;
pub mod graph;
pub mod model;
pub mod node;
pub mod op;
pub mod ops;
pub mod propagate;
pub mod reference;
pub mod types;
pub mod utils;
pub mod value;
pub mod var;

pub use context::Context;
pub use error::{Error, Result};
pub use graph::{results, Graph};
pub use model::{Model, ValidationLevel};
pub use propagate::{Evaluator, PropagationConfig};
pub use reference::ReferenceEvaluator;
pub use types::{Dim, ElemKind, Shape, Type};
pub use value::{NativeValue, TensorData, TensorValue, Value};
pub use var::Var;
