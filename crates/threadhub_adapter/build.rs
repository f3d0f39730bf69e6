fn main() {
    let proto_files = ["proto/threads_db.proto", "proto/threads_net.proto"];
    for proto_file in proto_files {
        println!("cargo:rerun-if-changed={proto_file}");
    }
    tonic_build::configure()
        .build_server(true)
        .compile_protos(&proto_files, &["proto"])
        .expect("thread service proto compilation must succeed");
}
