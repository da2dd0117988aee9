//! Volume discovery: listing page → ordered volume/chapter skeletons.
//!
//! Sites list newest first, so both volumes and chapters are reversed before
//! ids are assigned. Chapter ids come from one counter shared by all volumes
//! and are assigned before range filtering, so a chapter keeps its id (and
//! its cache entry) whatever range is requested.

use std::time::Duration;

use tracing::{debug, info, instrument};

use novelpack_browser::Page;
use novelpack_shared::{Chapter, Result, Volume, VolumeRange};
use novelpack_storage::NovelLayout;

use crate::adapters::{ListingVolume, SiteAdapter};

/// Builds volume skeletons for one novel.
pub struct VolumeDiscoverer<'a> {
    adapter: &'a dyn SiteAdapter,
    layout: &'a NovelLayout,
    wait: Duration,
}

impl<'a> VolumeDiscoverer<'a> {
    pub fn new(adapter: &'a dyn SiteAdapter, layout: &'a NovelLayout, wait: Duration) -> Self {
        Self {
            adapter,
            layout,
            wait,
        }
    }

    /// Read the listing on `page` and keep the volumes inside `range`.
    #[instrument(skip_all, fields(adapter = self.adapter.name(), url = page.url()))]
    pub async fn discover(&self, page: &mut dyn Page, range: VolumeRange) -> Result<Vec<Volume>> {
        let listing = self.adapter.discover_listing(page, self.wait).await?;
        let volumes = build_volumes(listing, range, self.layout);
        info!(
            volumes = volumes.len(),
            chapters = volumes.iter().map(Volume::chapter_count).sum::<usize>(),
            "discovery complete"
        );
        Ok(volumes)
    }
}

/// Order, number, and filter a raw listing.
pub fn build_volumes(
    listing: Vec<ListingVolume>,
    range: VolumeRange,
    layout: &NovelLayout,
) -> Vec<Volume> {
    let total = u32::try_from(listing.len()).unwrap_or(u32::MAX);
    let (start, end) = range.resolve(total);

    let mut volumes = Vec::new();
    let mut next_chapter_id = 1u32;

    for (id, raw) in (1u32..).zip(listing.into_iter().rev()) {
        let title = if raw.title.trim().is_empty() {
            format!("Volume {id}")
        } else {
            raw.title.trim().to_string()
        };

        let chapters: Vec<Chapter> = raw
            .chapters
            .into_iter()
            .rev()
            .map(|link| {
                let chapter_id = next_chapter_id;
                next_chapter_id += 1;
                let title = if link.title.is_empty() {
                    format!("{chapter_id} - No Title")
                } else {
                    link.title
                };
                Chapter::new(chapter_id, title, link.url)
            })
            .collect();

        if id < start {
            debug!(volume_id = id, %title, "before range, skipping");
            continue;
        }

        volumes.push(Volume {
            id,
            path: layout.volume_dir(id, &title),
            cache_path: layout.volume_cache_dir(id, &title),
            title,
            chapters,
        });

        if id >= end {
            break;
        }
    }

    volumes
}
