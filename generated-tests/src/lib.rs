//! Factories generated from [`world`] at build time.
//!
//! `build.rs` compiles the graph and renders it with
//! [`dependency_weaver::emit::write_module`]; [`generated`] is that output.
//! The tests drive it through a [`CompiledContainer`] holding the same
//! graph's host bindings and compare every result with the [`Resolver`].
//!
//! [`CompiledContainer`]: dependency_weaver::CompiledContainer
//! [`Resolver`]: dependency_weaver::Resolver

pub mod world;

pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/weaver_graph.rs"));
}
