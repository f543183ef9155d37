//! Dataset capture: save camera frames as numbered PNGs in a per-person directory.

use image::GrayImage;
use rollcall_core::{is_markable, Identity};
use rollcall_hw::{CameraError, Frame, FrameSource};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("invalid person name {0:?}: must be non-empty, not \"Unknown\", and contain no path separators")]
    InvalidName(String),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("dataset io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame of {len} bytes does not fit {width}x{height}")]
    FrameShape { len: usize, width: u32, height: u32 },
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Default)]
pub struct CaptureReport {
    pub saved: Vec<PathBuf>,
    pub dark_skipped: usize,
}

/// Reject names that would escape the dataset directory, or that could never be marked present.
pub fn validate_name(name: &str) -> Result<&str, CaptureError> {
    let trimmed = name.trim();
    if !is_markable(trimmed)
        || trimmed.eq_ignore_ascii_case(Identity::UNKNOWN_LABEL)
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
    {
        return Err(CaptureError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

/// First unused image number in `dir`: one past the highest numeric file stem.
fn next_index(dir: &Path) -> Result<usize, CaptureError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CaptureError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            entry
                .path()
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<usize>().ok())
        })
        .map(|n| n + 1)
        .max()
        .unwrap_or(0))
}

fn save_png(frame: &Frame, path: &Path) -> Result<(), CaptureError> {
    let image = GrayImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
        CaptureError::FrameShape {
            len: frame.data.len(),
            width: frame.width,
            height: frame.height,
        },
    )?;
    image.save(path)?;
    Ok(())
}

/// Save up to `count` non-dark frames into `person_dir`, `interval` apart.
///
/// Gives up after `count * 3` frames so a covered lens cannot spin forever.
pub fn capture_dataset<F: FrameSource>(
    source: &mut F,
    person_dir: &Path,
    count: usize,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<CaptureReport, CaptureError> {
    std::fs::create_dir_all(person_dir).map_err(|source| CaptureError::Io {
        path: person_dir.to_path_buf(),
        source,
    })?;
    let mut index = next_index(person_dir)?;
    let mut report = CaptureReport::default();

    for _ in 0..count.saturating_mul(3) {
        if report.saved.len() >= count || cancel.is_cancelled() {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if frame.is_dark {
            report.dark_skipped += 1;
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        let path = person_dir.join(format!("{index}.png"));
        save_png(&frame, &path)?;
        tracing::info!(path = %path.display(), "image saved");
        report.saved.push(path);
        index += 1;

        if report.saved.len() < count && !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct Frames(VecDeque<Frame>);

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            Ok(self.0.pop_front())
        }
    }

    fn frames(levels: &[u8]) -> Frames {
        Frames(
            levels
                .iter()
                .enumerate()
                .map(|(i, &level)| Frame::from_gray(vec![level; 16], 4, 4, i as u32))
                .collect(),
        )
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Ada Lovelace ").unwrap(), "Ada Lovelace");
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_validate_name_rejects_unknown_label() {
        assert!(matches!(validate_name("Unknown"), Err(CaptureError::InvalidName(_))));
        assert!(validate_name(" unknown ").is_err());
        assert_eq!(validate_name("Unknownson").unwrap(), "Unknownson");
    }

    #[test]
    fn test_saves_requested_count_skipping_dark() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("ada");
        let mut source = frames(&[0, 120, 0, 130, 140]);

        let report = capture_dataset(&mut source, &dir, 2, Duration::ZERO, &CancellationToken::new()).unwrap();

        assert_eq!(report.saved, vec![dir.join("0.png"), dir.join("1.png")]);
        assert_eq!(report.dark_skipped, 2);
        let saved = image::open(dir.join("1.png")).unwrap().to_luma8();
        assert_eq!(saved.dimensions(), (4, 4));
        assert_eq!(saved.get_pixel(0, 0).0[0], 130);
    }

    #[test]
    fn test_numbering_continues_after_existing_images() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("ada");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("4.jpg"), b"old").unwrap();
        std::fs::write(dir.join("notes.txt"), b"not an image").unwrap();

        let mut source = frames(&[100]);
        let report = capture_dataset(&mut source, &dir, 1, Duration::ZERO, &CancellationToken::new()).unwrap();

        assert_eq!(report.saved, vec![dir.join("5.png")]);
    }

    #[test]
    fn test_stops_when_source_exhausted() {
        let tmp = tempdir().unwrap();
        let mut source = frames(&[100]);
        let report =
            capture_dataset(&mut source, tmp.path(), 5, Duration::ZERO, &CancellationToken::new()).unwrap();
        assert_eq!(report.saved.len(), 1);
    }

    #[test]
    fn test_gives_up_on_all_dark_frames() {
        let tmp = tempdir().unwrap();
        let mut source = frames(&[0; 20]);
        let report =
            capture_dataset(&mut source, tmp.path(), 2, Duration::ZERO, &CancellationToken::new()).unwrap();
        assert!(report.saved.is_empty());
        assert_eq!(report.dark_skipped, 6);
    }

    #[test]
    fn test_huge_count_does_not_overflow() {
        let tmp = tempdir().unwrap();
        let mut source = frames(&[100, 0, 110]);
        let report =
            capture_dataset(&mut source, tmp.path(), usize::MAX, Duration::ZERO, &CancellationToken::new()).unwrap();
        assert_eq!(report.saved.len(), 2);
        assert_eq!(report.dark_skipped, 1);
    }

    #[test]
    fn test_cancelled_saves_nothing() {
        let tmp = tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = frames(&[100, 100]);
        let report = capture_dataset(&mut source, tmp.path(), 2, Duration::ZERO, &cancel).unwrap();
        assert!(report.saved.is_empty());
    }
}
