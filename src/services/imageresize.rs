//! On-demand image resizing with a two-level disk cache.
//!
//! A source image is identified by `<dev>.<inode>`. The cache directory holds
//! one file with the original dimensions (`<key>` containing `WxH`) and one
//! file per rendered variant (`<key>:<w>x<h>q=<q>`). Work for one source is
//! serialized by a per-key lock, so a variant is decoded and encoded once.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;

use super::idhash::random_id;

const DEFAULT_QUALITY: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum ResizeError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Requested output. Zero means "not given".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

/// Source formats the resizer understands, by extension.
pub fn image_format(path: &Path) -> Option<ImageFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "tbn" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        _ => None,
    }
}

/// Output size for a source of `orig` pixels. Never larger than the source.
pub fn target_size(orig: (u32, u32), p: &ResizeParams) -> (u32, u32) {
    let (ow, oh) = orig;
    if ow == 0 || oh == 0 {
        return orig;
    }
    let (mut w, mut h) = match (p.width, p.height) {
        (0, 0) => (ow, oh),
        (w, 0) => (w, scale(oh, w, ow)),
        (0, h) => (scale(ow, h, oh), h),
        (w, h) => (w, h),
    };
    if p.max_width > 0 && w > p.max_width {
        h = scale(h, p.max_width, w);
        w = p.max_width;
    }
    if p.max_height > 0 && h > p.max_height {
        w = scale(w, p.max_height, h);
        h = p.max_height;
    }
    if w > ow || h > oh {
        return orig;
    }
    (w.max(1), h.max(1))
}

/// `v * num / den`, rounded.
fn scale(v: u32, num: u32, den: u32) -> u32 {
    ((v as u64 * num as u64 + den as u64 / 2) / den as u64) as u32
}

fn parse_dims(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.trim().split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[cfg(unix)]
fn file_key(meta: &std::fs::Metadata, _path: &Path) -> String {
    use std::os::unix::fs::MetadataExt;
    format!("{}.{}", meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn file_key(_meta: &std::fs::Metadata, path: &Path) -> String {
    super::idhash::id_hash(&path.to_string_lossy())
}

pub struct Resizer {
    cache_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    decodes: AtomicU64,
}

impl Resizer {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            locks: Mutex::new(HashMap::new()),
            decodes: AtomicU64::new(0),
        }
    }

    /// Number of full decodes performed so far.
    pub fn decode_count(&self) -> u64 {
        self.decodes.load(Ordering::Relaxed)
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Path of the file to serve for `source` at the requested size.
    ///
    /// Unknown types and requests that change nothing return `source` itself.
    pub async fn resize(&self, source: &Path, params: ResizeParams) -> Result<PathBuf, ResizeError> {
        let Some(format) = image_format(source) else {
            return Ok(source.to_path_buf());
        };
        let meta = fs::metadata(source).await?;
        let key = file_key(&meta, source);

        let orig = self.dimensions(source, format, &key).await?;
        let (w, h) = target_size(orig, &params);
        if (w, h) == orig && params.quality == 0 {
            return Ok(source.to_path_buf());
        }
        let quality = match params.quality {
            0 => DEFAULT_QUALITY,
            q => q.min(100),
        };

        let cached = self.cache_dir.join(format!("{key}:{w}x{h}q={quality}"));
        if fs::try_exists(&cached).await.unwrap_or(false) {
            return Ok(cached);
        }

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        if fs::try_exists(&cached).await.unwrap_or(false) {
            return Ok(cached);
        }

        self.decodes.fetch_add(1, Ordering::Relaxed);
        let src = source.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || render(&src, format, w, h, quality)).await??;
        write_atomic(&cached, &bytes).await?;
        tracing::debug!(
            "Resized {} to {}x{} q={} ({} bytes)",
            source.display(),
            w,
            h,
            quality,
            bytes.len()
        );
        Ok(cached)
    }

    /// Original dimensions, from the cache or by reading the image header.
    async fn dimensions(&self, source: &Path, format: ImageFormat, key: &str) -> Result<(u32, u32), ResizeError> {
        let dims_file = self.cache_dir.join(key);
        if let Ok(s) = fs::read_to_string(&dims_file).await {
            if let Some(d) = parse_dims(&s) {
                return Ok(d);
            }
            tracing::warn!("Ignoring bad dimensions cache entry {}", dims_file.display());
        }

        let src = source.to_path_buf();
        let dims = tokio::task::spawn_blocking(move || -> Result<(u32, u32), ResizeError> {
            let reader = BufReader::new(std::fs::File::open(&src)?);
            Ok(ImageReader::with_format(reader, format).into_dimensions()?)
        })
        .await??;
        write_atomic(&dims_file, format!("{}x{}", dims.0, dims.1).as_bytes()).await?;
        Ok(dims)
    }
}

fn render(source: &Path, format: ImageFormat, w: u32, h: u32, quality: u8) -> Result<Vec<u8>, ResizeError> {
    let data = std::fs::read(source)?;
    let img = image::load_from_memory_with_format(&data, format)?;
    let img = if (img.width(), img.height()) == (w, h) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    };

    let mut out = Vec::new();
    match format {
        ImageFormat::Png => img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
        _ => JpegEncoder::new_with_quality(&mut out, quality).encode_image(&img.to_rgb8())?,
    }
    Ok(out)
}

/// Write to a temporary name in the same directory, then rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".tmp-{}", random_id()));
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_jpeg(path: &Path, w: u32, h: u32) {
        let img = image::RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        img.save_with_format(path, ImageFormat::Jpeg).unwrap();
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_target_size() {
        let p = |w, h, mw, mh| ResizeParams {
            width: w,
            height: h,
            max_width: mw,
            max_height: mh,
            quality: 0,
        };
        assert_eq!(target_size((600, 900), &p(0, 0, 0, 0)), (600, 900));
        assert_eq!(target_size((600, 900), &p(300, 0, 0, 0)), (300, 450));
        assert_eq!(target_size((600, 900), &p(0, 450, 0, 0)), (300, 450));
        assert_eq!(target_size((600, 900), &p(300, 450, 0, 0)), (300, 450));
        assert_eq!(target_size((600, 900), &p(0, 0, 200, 0)), (200, 300));
        assert_eq!(target_size((600, 900), &p(0, 0, 0, 300)), (200, 300));
        // No upscaling.
        assert_eq!(target_size((600, 900), &p(1200, 0, 0, 0)), (600, 900));
    }

    #[test]
    fn test_image_format() {
        assert_eq!(image_format(Path::new("a/poster.JPG")), Some(ImageFormat::Jpeg));
        assert_eq!(image_format(Path::new("show.tbn")), Some(ImageFormat::Jpeg));
        assert_eq!(image_format(Path::new("logo.png")), Some(ImageFormat::Png));
        assert_eq!(image_format(Path::new("clip.gif")), None);
        assert_eq!(image_format(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn test_passthrough() {
        let media = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let src = media.path().join("poster.jpg");
        write_jpeg(&src, 60, 90);
        let resizer = Resizer::new(cache.path());

        let out = resizer.resize(&src, ResizeParams::default()).await.unwrap();
        assert_eq!(out, src);
        assert_eq!(resizer.decode_count(), 0);
        // The dimensions entry was still recorded.
        let names = files_in(cache.path());
        assert_eq!(names.len(), 1);
        let dims = std::fs::read_to_string(cache.path().join(&names[0])).unwrap();
        assert_eq!(dims, "60x90");

        let txt = media.path().join("notes.txt");
        std::fs::write(&txt, "x").unwrap();
        assert_eq!(resizer.resize(&txt, ResizeParams::default()).await.unwrap(), txt);
    }

    #[tokio::test]
    async fn test_resize_is_cached() {
        let media = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let src = media.path().join("poster.jpg");
        write_jpeg(&src, 60, 90);
        let resizer = Resizer::new(cache.path());
        let params = ResizeParams {
            width: 30,
            quality: 80,
            ..Default::default()
        };

        let out = resizer.resize(&src, params).await.unwrap();
        assert!(out.to_string_lossy().ends_with(":30x45q=80"));
        assert_eq!(image::image_dimensions(&src).unwrap(), (60, 90));
        let decoded = image::load_from_memory(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 45));

        resizer.resize(&src, params).await.unwrap();
        assert_eq!(resizer.decode_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_decode_once() {
        let media = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let src = media.path().join("poster.jpg");
        write_jpeg(&src, 600, 900);
        let resizer = Arc::new(Resizer::new(cache.path()));
        let params = ResizeParams {
            width: 300,
            height: 450,
            quality: 80,
            ..Default::default()
        };

        let (a, b) = tokio::join!(
            {
                let r = resizer.clone();
                let s = src.clone();
                tokio::spawn(async move { r.resize(&s, params).await.unwrap() })
            },
            {
                let r = resizer.clone();
                let s = src.clone();
                tokio::spawn(async move { r.resize(&s, params).await.unwrap() })
            }
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        assert_eq!(resizer.decode_count(), 1);
        // Dimensions entry plus one variant, no leftover temp files.
        assert_eq!(files_in(cache.path()).len(), 2);
    }
}
