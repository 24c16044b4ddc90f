fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protos: &[&str] = &["proto/pczt/v1/pczt.proto"];
    let includes: &[&str] = &["proto"];
    for proto in protos {
        #[allow(clippy::print_stdout)]
        {
            println!("cargo:rerun-if-changed={proto}");
        }
    }
    let file_descriptors = protox::compile(protos, includes)?;
    let mut config = prost_build::Config::new();
    config.enable_type_names().compile_fds(file_descriptors)?;
    Ok(())
}
