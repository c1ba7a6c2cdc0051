fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Source a protoc binary from the vendored crate when one isn't on PATH.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }

    // Compile the protobuf file into Rust code
    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/fleet.proto"], &["proto"])?;

    Ok(())
}
