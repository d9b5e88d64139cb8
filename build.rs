use std::path::{Path, PathBuf};

/// Libraries the decoder and the demuxer link against.
const FFMPEG_LIBS: &[&str] = &["avcodec-", "avformat-", "avutil-", "swresample-", "swscale-"];

fn main() {
    println!("cargo:rerun-if-env-changed=FRAMEGATE_FFMPEG_DIR");

    let ffmpeg_bin = std::env::var_os("FRAMEGATE_FFMPEG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("third_party/ffmpeg/bin"));
    println!("cargo:rerun-if-changed={}", ffmpeg_bin.display());

    if !ffmpeg_bin.exists() {
        // system-wide FFmpeg, found by ac-ffmpeg through pkg-config
        return;
    }
    println!("cargo:rustc-link-search=native={}", ffmpeg_bin.display());

    #[cfg(target_os = "windows")]
    copy_runtime_dlls(&ffmpeg_bin);
}

/// Put the FFmpeg DLLs next to the binary so it runs straight from target/.
#[cfg(target_os = "windows")]
fn copy_runtime_dlls(ffmpeg_bin: &Path) {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());
    // OUT_DIR is target/<profile>/build/<crate>/out
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .expect("Cannot resolve target dir");

    for entry in std::fs::read_dir(ffmpeg_bin).expect("Cannot read ffmpeg bin dir") {
        let path = entry.unwrap().path();
        if !is_ffmpeg_library(&path, ".dll") {
            continue;
        }
        let dest = target_dir.join(path.file_name().unwrap());
        if !dest.exists() || file_modified(&path) > file_modified(&dest) {
            std::fs::copy(&path, &dest)
                .unwrap_or_else(|e| panic!("Failed to copy {:?} to {:?}: {}", path, dest, e));
            println!("cargo:warning=Copied {} to output dir", path.display());
        }
    }
}

#[cfg(target_os = "windows")]
fn file_modified(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

#[allow(dead_code)]
fn is_ffmpeg_library(path: &Path, extension: &str) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let lower = file_name.to_ascii_lowercase();
    lower.ends_with(extension) && FFMPEG_LIBS.iter().any(|prefix| lower.starts_with(prefix))
}
