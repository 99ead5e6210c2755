fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        unsafe {
            std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
        }
    }
    tonic_build::configure()
        .build_client(false)
        .compile_protos(&["proto/mail.proto"], &["proto"])?;
    Ok(())
}
