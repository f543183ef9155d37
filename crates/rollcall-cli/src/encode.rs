//! Gallery builder: encode every image under `<dataset>/<person>/` into one reference per image.

use rollcall_core::{is_markable, Embedding, EncoderError, FaceEncoder, Gallery, ReferenceEncoding};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("dataset directory not found: {0}")]
    DatasetMissing(PathBuf),
    #[error("dataset io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot encode faces in {path}: {source}")]
    Encoder {
        path: PathBuf,
        #[source]
        source: EncoderError,
    },
}

/// What happened to each image during a build.
#[derive(Debug, Default)]
pub struct EncodeReport {
    pub encoded: usize,
    /// Images in which the detector found no face.
    pub no_face: Vec<PathBuf>,
    /// Images that could not be decoded or encoded.
    pub failed: Vec<PathBuf>,
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, EncodeError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EncodeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| EncodeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    paths.sort();
    Ok(paths)
}

/// Encode one image, returning the most confident face's embedding.
fn encode_image<E: FaceEncoder>(encoder: &mut E, path: &Path) -> Result<Option<Embedding>, EncodeError> {
    let gray = image::open(path)
        .map_err(|source| EncodeError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();
    let (width, height) = gray.dimensions();
    let faces = encoder
        .encode(gray.as_raw(), width, height)
        .map_err(|source| EncodeError::Encoder {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(faces.into_iter().next().map(|face| face.embedding))
}

/// Walk the dataset in name order and build a gallery.
///
/// Person directories become labels. Unreadable images and images without a
/// face are skipped and listed in the report. Loose files at the dataset root
/// are ignored.
pub fn build_gallery<E: FaceEncoder>(
    dataset_dir: &Path,
    encoder: &mut E,
) -> Result<(Gallery, EncodeReport), EncodeError> {
    if !dataset_dir.is_dir() {
        return Err(EncodeError::DatasetMissing(dataset_dir.to_path_buf()));
    }

    let mut references = Vec::new();
    let mut report = EncodeReport::default();

    for person_dir in sorted_entries(dataset_dir)? {
        if !person_dir.is_dir() {
            continue;
        }
        let Some(identity) = person_dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            tracing::warn!(path = %person_dir.display(), "skipping directory with non-UTF-8 name");
            continue;
        };
        if !is_markable(&identity) {
            tracing::warn!(path = %person_dir.display(), "skipping directory with a reserved name");
            continue;
        }

        let before = references.len();
        for image_path in sorted_entries(&person_dir)? {
            if !image_path.is_file() {
                continue;
            }
            match encode_image(encoder, &image_path) {
                Ok(Some(embedding)) => {
                    references.push(ReferenceEncoding {
                        identity: identity.clone(),
                        embedding,
                    });
                    report.encoded += 1;
                }
                Ok(None) => {
                    tracing::warn!(path = %image_path.display(), "no face found, skipping");
                    report.no_face.push(image_path);
                }
                Err(e @ (EncodeError::Image { .. } | EncodeError::Encoder { .. })) => {
                    tracing::warn!(error = %e, "skipping image");
                    report.failed.push(image_path);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(identity, references = references.len() - before, "encoded person");
    }

    let gallery = Gallery::new(references, encoder.model_version().map(str::to_string));
    Ok((gallery, report))
}
