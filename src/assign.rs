//! Sample profile pictures for a list of users, for exercising the classifier end to end.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use walkdir::WalkDir;

use crate::default_progress_style;

pub const DEFAULT_SEED: u64 = 42;
pub const MAPPING_FILE: &str = "profile_image_mapping.csv";
pub const IMAGES_DIR: &str = "images";
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "bmp"];

const MAPPING_HEADER: [&str; 6] = [
    "userId",
    "displayName",
    "userPrincipalName",
    "imageType",
    "imagePath",
    "sourceImage",
];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    strum::EnumIter,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageCategory {
    Human,
    Avatar,
    Animal,
    NoPic,
}

impl ImageCategory {
    pub const fn share_percent(self) -> usize {
        match self {
            Self::Human => 50,
            Self::Avatar => 20,
            Self::Animal => 20,
            Self::NoPic => 10,
        }
    }

    /// Directory under the source root holding samples of this category.
    pub const fn source_dir(self) -> Option<&'static str> {
        match self {
            Self::Human => Some("fairface"),
            Self::Avatar => Some("avatars"),
            Self::Animal => Some("animal_faces"),
            Self::NoPic => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub user_principal_name: String,
}

pub fn load_users(path: &Path) -> anyhow::Result<Vec<User>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read users file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a users array", path.display()))
}

/// `floor(users * share)` per category, with the rounding shortfall added to [`ImageCategory::Human`].
pub fn category_counts(users: usize) -> BTreeMap<ImageCategory, usize> {
    let mut counts: BTreeMap<_, _> = ImageCategory::iter()
        .map(|category| (category, users * category.share_percent() / 100))
        .collect();
    let assigned: usize = counts.values().sum();
    *counts.entry(ImageCategory::Human).or_default() += users - assigned;
    counts
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|extension| IMAGE_EXTENSIONS.contains(&extension.as_str()))
}

/// Every image file below `dir`, in file name order. A missing directory has no images.
pub fn find_images(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "image directory does not exist");
        return Vec::new();
    }
    let images: Vec<_> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| {
            entry
                .inspect_err(|err| tracing::warn!("skipping unreadable entry: {err}"))
                .ok()
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| is_image(path))
        .collect();
    tracing::info!(dir = %dir.display(), count = images.len(), "found images");
    images
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub category: ImageCategory,
    pub source: Option<PathBuf>,
}

/// Pick source images for each category and shuffle them together.
///
/// Sampling is without replacement when a category has enough images. A
/// category without any images contributes nothing.
pub fn assign(
    counts: &BTreeMap<ImageCategory, usize>,
    available: &BTreeMap<ImageCategory, Vec<PathBuf>>,
    rng: &mut impl Rng,
) -> Vec<Assignment> {
    let mut assignments = Vec::with_capacity(counts.values().sum());
    for (&category, &count) in counts {
        if category.source_dir().is_none() {
            assignments.extend((0..count).map(|_| Assignment { category, source: None }));
            continue;
        }
        let Some(images) = available.get(&category).filter(|images| !images.is_empty()) else {
            tracing::warn!(%category, count, "no images available, skipping category");
            continue;
        };
        let selected: Vec<&PathBuf> = if images.len() >= count {
            images.choose_multiple(rng, count).collect()
        } else {
            (0..count).filter_map(|_| images.choose(rng)).collect()
        };
        assignments.extend(selected.into_iter().map(|source| Assignment {
            category,
            source: Some(source.clone()),
        }));
    }
    assignments.shuffle(rng);
    assignments
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedImage {
    pub category: ImageCategory,
    /// Relative to the output directory; `None` when there is no picture or the copy failed.
    pub image_path: Option<String>,
    pub source: Option<PathBuf>,
}

/// Copy assigned images to `<output>/images/profile_<index>_<category><ext>`.
pub fn copy_images(assignments: &[Assignment], output: &Path) -> anyhow::Result<Vec<CopiedImage>> {
    let images_dir = output.join(IMAGES_DIR);
    fs::create_dir_all(&images_dir)
        .with_context(|| format!("failed to create {}", images_dir.display()))?;

    let span = tracing::info_span!("copy");
    span.pb_set_length(assignments.len() as u64);
    span.pb_set_style(&default_progress_style());
    span.pb_set_message("Copying images...");
    let span = span.entered();

    let copied: Vec<_> = assignments
        .iter()
        .enumerate()
        .map(|(index, Assignment { category, source })| {
            let image_path = source.as_ref().and_then(|source| {
                let extension = source
                    .extension()
                    .map(|extension| format!(".{}", extension.to_string_lossy()))
                    .unwrap_or_default();
                let name = format!("profile_{index:04}_{category}{extension}");
                match fs::copy(source, images_dir.join(&name)) {
                    Ok(_) => Some(format!("{IMAGES_DIR}/{name}")),
                    Err(err) => {
                        tracing::warn!(source = %source.display(), "failed to copy image: {err}");
                        None
                    }
                }
            });
            span.pb_inc(1);
            CopiedImage {
                category: *category,
                image_path,
                source: source.clone(),
            }
        })
        .collect();
    tracing::info!(
        copied = copied.iter().filter(|image| image.image_path.is_some()).count(),
        "copied images"
    );
    Ok(copied)
}

#[derive(Debug, Serialize)]
struct MappingRow<'a> {
    user_id: &'a str,
    display_name: &'a str,
    user_principal_name: &'a str,
    image_type: ImageCategory,
    image_path: &'a str,
    source_image: String,
}

/// Pair user `i` with image `i`; users beyond the image list are left out.
pub fn write_mapping(path: &Path, users: &[User], images: &[CopiedImage]) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(MAPPING_HEADER)?;
    for (user, image) in users.iter().zip(images) {
        writer.serialize(MappingRow {
            user_id: &user.id,
            display_name: &user.display_name,
            user_principal_name: &user.user_principal_name,
            image_type: image.category,
            image_path: image.image_path.as_deref().unwrap_or_default(),
            source_image: image
                .source
                .as_ref()
                .map(|source| source.display().to_string())
                .unwrap_or_default(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Assign, copy and map images for `users`, returning how many rows each category got.
#[bon::builder]
pub fn assign_images(
    users: &[User],
    source: &Path,
    output: &Path,
    #[builder(default = DEFAULT_SEED)] seed: u64,
) -> anyhow::Result<BTreeMap<ImageCategory, usize>> {
    let counts = category_counts(users.len());
    for (category, count) in &counts {
        tracing::info!(%category, count, "planned");
    }
    let available: BTreeMap<_, _> = ImageCategory::iter()
        .filter_map(|category| {
            let dir = category.source_dir()?;
            Some((category, find_images(&source.join(dir))))
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let assignments = assign(&counts, &available, &mut rng);
    let copied = copy_images(&assignments, output)?;
    let mapping = output.join(MAPPING_FILE);
    write_mapping(&mapping, users, &copied)?;
    tracing::info!(path = %mapping.display(), "wrote mapping");

    let mut distribution = BTreeMap::new();
    for image in &copied {
        *distribution.entry(image.category).or_default() += 1;
    }
    Ok(distribution)
}
