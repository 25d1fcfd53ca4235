//! Build script for the generated factory module
//!
//! Compiles the binding graph in `src/world.rs` and writes the rendered
//! factories to `OUT_DIR/weaver_graph.rs`, which the library includes.

use std::env;
use std::path::Path;

use dependency_weaver::{Compiler, emit};

#[allow(dead_code)]
#[path = "src/world.rs"]
mod world;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();

    println!(
        "cargo:rerun-if-changed={}",
        Path::new(&manifest_dir).join("src/world.rs").display()
    );

    let world = world::world();
    let units = Compiler::from_shared(world.types, world.metadata)
        .compile(&world::requests())
        .unwrap_or_else(|e| panic!("binding graph failed to compile: {e}"));

    let output = Path::new(&out_dir).join("weaver_graph.rs");
    emit::write_module(&units, &output)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", output.display()));
}
