// ABOUTME: Build script for generating Rust code from xlm_eco_api.proto.
// ABOUTME: Uses tonic-build to compile protobuf definitions into Rust types.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server stubs are generated too so tests can stand up an in-process backend
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto-src/xlm_eco_api.proto"], &["proto-src"])?;

    println!("cargo:rerun-if-changed=proto-src/xlm_eco_api.proto");

    Ok(())
}
