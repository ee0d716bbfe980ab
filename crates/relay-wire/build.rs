fn main() {
    println!("cargo:rerun-if-changed=proto/relay.proto");
    prost_build::compile_protos(&["proto/relay.proto"], &["proto/"])
        .expect("failed to compile relay.proto — is protoc installed?");
}
