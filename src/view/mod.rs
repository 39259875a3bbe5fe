//! View Module - from declarative view JSON to a live render tree
//!
//! - `ast`: arena of parsed nodes
//! - `parser`: raw JSON → AST, extended through `parse_node`
//! - `resolver`: incremental AST → render tree with per-node dependencies
//! - `instance`: [`ViewInstance`], one parsed view plus its resolver
//! - `controller`: [`ViewController`], creates views on VIEW states and batches updates
//! - `plugins`: switch, template, applicability, arrays, string refs, asset transforms

pub mod ast;
mod controller;
mod instance;
pub mod parser;
pub mod plugins;
pub mod resolver;

pub use ast::{Ast, Child, Node, NodeId, NodeKind, NodeType};
pub use controller::{ResolveViewArgs, ViewController, ViewControllerHooks, ViewControllerOptions};
pub use instance::{ViewInstance, ViewInstanceHooks};
pub use parser::{ParseOptions, ParseOutcome, ParseRequest, Parser, ParserHooks};
pub use plugins::{default_plugins, ViewPlugin};
pub use resolver::{NodeUpdate, NodeUpdateEvent, ResolveContext, Resolver, ResolverHooks, ResolverOptions};
