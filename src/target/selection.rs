//! Quality-based tile selection for a viewport.

use std::collections::BTreeSet;

use glam::Vec3;

use crate::error::{RenderError, RenderResult};
use crate::tiles::{QualityRankingInfo, TileInformation};

/// A tile offered by one of the source videos at its video's ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub ranking: i32,
    pub tile: TileInformation,
}

impl Candidate {
    fn sort_key(&self) -> (i32, u32, u32) {
        (self.ranking, self.tile.video_id, self.tile.tile_id)
    }
}

/// Sort candidates best first: ascending ranking, then tile key.
pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by_key(Candidate::sort_key);
}

/// Outcome of one selection pass.
#[derive(Debug, Clone, Default)]
pub(crate) struct Selection {
    pub info: QualityRankingInfo,
    /// `(ranking, video_id, tile_id)` of every tile hit by a viewport ray.
    pub in_view: BTreeSet<(i32, u32, u32)>,
    /// Keys of tiles picked as background by the coverage grid.
    pub background: BTreeSet<(u32, u32)>,
    pub all_high: bool,
    pub substitutions: usize,
    pub gaps: usize,
}

/// Inputs of a selection pass that stay fixed for a render target.
pub(crate) struct SelectionParams<'a> {
    pub candidates: &'a [Candidate],
    pub main_ranking: i32,
    pub picture: (u32, u32),
    pub coverage_grid: (u32, u32),
}

/// Pick tiles for the viewport sampled by `rays`.
///
/// `project` maps a direction into the projected picture and `available`
/// tells whether a tile has data for the current frame. `candidates` must be
/// sorted with [`sort_candidates`].
pub(crate) fn select(
    params: &SelectionParams<'_>,
    rays: &[Vec3],
    project: impl Fn(Vec3) -> (f32, f32),
    available: impl Fn(&TileInformation) -> bool,
) -> RenderResult<Selection> {
    let mut selection = Selection {
        info: QualityRankingInfo::new(params.main_ranking),
        ..Default::default()
    };
    let mut substituted: BTreeSet<(u32, u32)> = BTreeSet::new();

    for ray in rays {
        let (x, y) = project(*ray);
        let mut skipped: Option<&Candidate> = None;
        let mut chosen: Option<&Candidate> = None;
        for candidate in params.candidates {
            if !candidate.tile.projected_rect().contains(x, y) {
                continue;
            }
            if available(&candidate.tile) {
                chosen = Some(candidate);
                break;
            }
            skipped.get_or_insert(candidate);
        }

        let Some(chosen) = chosen else {
            return Err(RenderError::TileUnavailable(match skipped {
                Some(c) => format!(
                    "tile {}/{} at ({x:.1}, {y:.1}) has no data and no substitute",
                    c.tile.video_id, c.tile.tile_id
                ),
                None => format!("no tile covers ({x:.1}, {y:.1})"),
            }));
        };
        if let Some(better) = skipped {
            if better.ranking < chosen.ranking && substituted.insert(better.tile.key()) {
                log::warn!(
                    "Tile {}/{} (ranking {}) unavailable, substituting {}/{} (ranking {})",
                    better.tile.video_id,
                    better.tile.tile_id,
                    better.ranking,
                    chosen.tile.video_id,
                    chosen.tile.tile_id,
                    chosen.ranking
                );
            }
        }
        if selection
            .in_view
            .insert((chosen.ranking, chosen.tile.video_id, chosen.tile.tile_id))
        {
            selection.info.insert(chosen.ranking, chosen.tile);
        }
    }
    selection.substitutions = substituted.len();
    selection.all_high = selection
        .in_view
        .iter()
        .all(|(ranking, _, _)| *ranking == params.main_ranking);

    if !selection.all_high {
        fill_background(params, &available, &mut selection);
    }
    Ok(selection)
}

/// Cover the whole picture with the lowest-quality available tiles.
fn fill_background(
    params: &SelectionParams<'_>,
    available: &impl Fn(&TileInformation) -> bool,
    selection: &mut Selection,
) {
    let (grid_x, grid_y) = params.coverage_grid;
    let (width, height) = params.picture;
    for gy in 0..grid_y {
        let y = (gy as f32 + 0.5) / grid_y as f32 * height as f32;
        for gx in 0..grid_x {
            let x = (gx as f32 + 0.5) / grid_x as f32 * width as f32;
            let lowest = params
                .candidates
                .iter()
                .rev()
                .find(|c| c.tile.projected_rect().contains(x, y) && available(&c.tile));
            match lowest {
                Some(candidate) => {
                    selection.background.insert(candidate.tile.key());
                    selection.info.insert(candidate.ranking, candidate.tile);
                }
                None => selection.gaps += 1,
            }
        }
    }
    if selection.gaps > 0 {
        log::debug!(
            "{} of {} coverage points have no tile data",
            selection.gaps,
            grid_x * grid_y
        );
    }
}
