//! Compile a configuration document that mixes lazy expressions, interpolation
//! and an in-memory `$require`, then mutate the scope and read it again.
//!
//! Usage: cargo run -p jsonex-core --example compile_json

use jsonex_core::{MemoryLoader, ObjectRef, Options, compile_document};
use serde_json::json;
use std::process;

fn main() {
    let loader = MemoryLoader::new().with(
        "/defaults.json",
        json!({"port": 8080, "workers": {"$": "cpus * 2"}}),
    );

    let scope = ObjectRef::new();
    scope.insert("env", "staging");
    scope.insert("cpus", 4);

    let document = json!({
        "name": "api",
        "host": "${name}.${env}.internal",
        "server": {
            "$extend": {"$require": "defaults.json"},
            "$with": {"port": 9000}
        }
    });

    let options = Options::new()
        .with_root("/")
        .with_loader(loader)
        .with_scope(scope.clone());
    let compiled = compile_document(&document, options).unwrap_or_else(|e| {
        eprintln!("compile: {e}");
        process::exit(1);
    });

    let print = |label: &str| match compiled.to_json() {
        Ok(json) => println!("{label}:\n{}", serde_json::to_string_pretty(&json).unwrap_or_default()),
        Err(e) => eprintln!("{label}: {e}"),
    };

    scope.insert("name", "api");
    print("staging");

    scope.insert("env", "production");
    scope.insert("cpus", 16);
    print("production");
}
