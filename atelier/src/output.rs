use std::path::{Path, PathBuf};

use anyhow::Context;
use atelier_imagegen::GenerationResult;

/// File extension for an image payload, sniffed from its magic bytes
pub fn extension(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "png",
        [0xFF, 0xD8, 0xFF, ..] => "jpg",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
        [b'G', b'I', b'F', b'8', ..] => "gif",
        _ => "bin",
    }
}

/// Write every image of `result` into `dir` as `<n>.<ext>`, numbered from 1
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be written
pub async fn write_images(dir: &Path, result: &GenerationResult) -> anyhow::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let mut written = Vec::with_capacity(result.images.len());
    for (index, image) in result.images.iter().enumerate() {
        let path = dir.join(format!("{}.{}", index + 1, extension(image)));
        tokio::fs::write(&path, image)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use atelier_imagegen::ResponseMetadata;

    use super::*;

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(extension(b"\x89PNG\r\n\x1a\n"), "png");
        assert_eq!(extension(&[0xFF, 0xD8, 0xFF, 0xE0]), "jpg");
        assert_eq!(extension(b"RIFF\x10\x00\x00\x00WEBPVP8 "), "webp");
        assert_eq!(extension(b"GIF89a"), "gif");
        assert_eq!(extension(b"RIFF\x10\x00\x00\x00WAVE"), "bin");
        assert_eq!(extension(b""), "bin");
    }

    #[tokio::test]
    async fn writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("renders");
        let result = GenerationResult {
            images: vec![b"\x89PNG....".to_vec().into(), b"GIF89a..".to_vec().into()],
            warnings: Vec::new(),
            response: ResponseMetadata {
                timestamp: jiff::Timestamp::UNIX_EPOCH,
                model_id: "flux-pro".into(),
                headers: Default::default(),
            },
        };

        let written = write_images(&out, &result).await.unwrap();

        assert_eq!(written, [out.join("1.png"), out.join("2.gif")]);
        assert_eq!(std::fs::read(out.join("2.gif")).unwrap(), b"GIF89a..");
    }
}
