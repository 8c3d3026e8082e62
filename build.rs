// 构建脚本: 启用 camera 特性时链接FFmpeg依赖库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var_os("CARGO_FEATURE_CAMERA").is_none() {
        return;
    }

    // 构建脚本运行在宿主机上, 目标平台要看 CARGO_CFG_*
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    // 仅在Windows MSVC环境下添加FFmpeg相关库
    if target_os == "windows" && target_env == "msvc" {
        // Intel QSV (Quick Sync Video) 硬件加速
        println!("cargo:rustc-link-lib=dylib=libmfx");

        // x264 编码器
        println!("cargo:rustc-link-lib=dylib=libx264");

        // OLE 自动化和VFW (dshow 摄像头)
        println!("cargo:rustc-link-lib=dylib=oleaut32");
        println!("cargo:rustc-link-lib=dylib=vfw32");

        // Secure Channel (RTSPS)
        println!("cargo:rustc-link-lib=dylib=secur32");
    }
}
