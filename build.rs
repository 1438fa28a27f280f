use chrono::Utc;

fn main() {
    // Stamp the build time into the binary / 将构建时间写入二进制
    let build_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    println!("cargo:rerun-if-changed=build.rs");
}
