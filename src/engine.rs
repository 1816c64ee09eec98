//! Incremental repaint engine: stage ladder driver and canvas worker

use std::sync::{Arc, Mutex, PoisonError};

use flume::{Receiver, Sender};
use log::{debug, warn};

use crate::cache::{RasterCache, RasterKey};
use crate::clock::FrameClock;
use crate::geometry::{Point, Rect, Size, visible_rect};
use crate::kernel::RepaintStage;
use crate::session::RenderSession;
use crate::task::{PassId, PassOutcome, RenderTask};
use crate::types::{PageSemantics, RasterPixels};

/// Host window geometry driving a repaint pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HostGeometry {
    /// Window inner size in window units
    pub window: Size,
    /// Mounted root's origin in window units; goes negative as the
    /// host scrolls down
    pub root_origin: Point,
    /// Host scale factor dividing window units into document units
    pub dom_scale: f32,
}

impl HostGeometry {
    #[must_use]
    pub const fn new(window: Size, root_origin: Point, dom_scale: f32) -> Self {
        Self {
            window,
            root_origin,
            dom_scale,
        }
    }
}

/// Snapshot of one mounted page the driver walks
#[derive(Clone, Debug)]
pub(crate) struct PageSlot {
    pub index: usize,
    /// Page bounding box in window units
    pub bounds: Rect,
    /// Page top edge in document units, for doc-global windowing
    pub doc_top: f32,
    /// Raster dims at the density captured when the pass was requested
    pub width_px: u32,
    pub height_px: u32,
}

pub(crate) enum PassRequest {
    Run {
        task: RenderTask,
        geometry: HostGeometry,
        /// Mounted root bounding box in window units
        root_bounds: Rect,
        pages: Vec<PageSlot>,
        revision: u64,
    },
    Shutdown,
}

pub(crate) enum CanvasJob {
    Chain {
        task: RenderTask,
        page: usize,
        rect: Rect,
        seq: u64,
        revision: u64,
        width_px: u32,
        height_px: u32,
        prepare_dirty: bool,
    },
    Shutdown,
}

/// Commits and acknowledgements flowing back to the host pump
pub(crate) enum LayerUpdate {
    Vector {
        pass: PassId,
        page: usize,
        svg: String,
    },
    Semantics {
        pass: PassId,
        page: usize,
        semantics: PageSemantics,
    },
    Canvas {
        pass: PassId,
        page: usize,
        seq: u64,
        pixels: Arc<RasterPixels>,
    },
    CanvasSkipped {
        pass: PassId,
        page: usize,
        seq: u64,
    },
    PassFinished {
        pass: PassId,
        outcome: PassOutcome,
    },
}

/// Per-page canvas sequence counters. A chain captures the sequence at
/// dispatch; the host pump drops any commit whose sequence has moved
/// on, so a chain from a superseded pass can never overwrite a newer
/// pass's canvas result.
pub(crate) struct PageSequences {
    seqs: Mutex<Vec<u64>>,
}

impl PageSequences {
    pub(crate) fn new(pages: usize) -> Self {
        Self {
            seqs: Mutex::new(vec![0; pages]),
        }
    }

    /// Grows the counter list for a new page count. Existing counters
    /// are preserved: a chain dispatched before a reload must not be
    /// able to collide with a fresh counter.
    pub(crate) fn ensure_pages(&self, pages: usize) {
        let mut seqs = self.seqs.lock().unwrap_or_else(PoisonError::into_inner);
        if pages > seqs.len() {
            seqs.resize(pages, 0);
        }
    }

    /// Bumps and returns the page's sequence; called at dispatch
    pub(crate) fn next(&self, page: usize) -> u64 {
        let mut seqs = self.seqs.lock().unwrap_or_else(PoisonError::into_inner);
        if page >= seqs.len() {
            seqs.resize(page + 1, 0);
        }
        seqs[page] += 1;
        seqs[page]
    }

    pub(crate) fn current(&self, page: usize) -> u64 {
        let seqs = self.seqs.lock().unwrap_or_else(PoisonError::into_inner);
        seqs.get(page).copied().unwrap_or(0)
    }
}

/// Stages the driver executes inline, in ladder order. The canvas tail
/// of the ladder is dispatched to the worker instead.
const FRONT_STAGES: [RepaintStage; 3] = [
    RepaintStage::Layout,
    RepaintStage::Svg,
    RepaintStage::Semantics,
];

/// Pass driver loop. Runs one repaint pass at a time; every request is
/// answered with exactly one `PassFinished`, which is the cancellation
/// acknowledgement the host awaits before starting a new pass.
pub(crate) fn pass_driver(
    session: Arc<RenderSession>,
    clock: Arc<dyn FrameClock>,
    canvas_tx: Sender<CanvasJob>,
    update_tx: Sender<LayerUpdate>,
    requests: Receiver<PassRequest>,
    seqs: Arc<PageSequences>,
) {
    for request in requests {
        match request {
            PassRequest::Shutdown => break,
            PassRequest::Run {
                task,
                geometry,
                root_bounds,
                pages,
                revision,
            } => {
                let outcome = run_pass(
                    &session, &*clock, &canvas_tx, &update_tx, &task, geometry, root_bounds,
                    &pages, revision, &seqs,
                );
                let _ = update_tx.send(LayerUpdate::PassFinished {
                    pass: task.id,
                    outcome,
                });
            }
        }
    }
}

#[expect(
    clippy::too_many_arguments,
    reason = "pass parameters are one request, unpacked by the driver"
)]
fn run_pass(
    session: &RenderSession,
    clock: &dyn FrameClock,
    canvas_tx: &Sender<CanvasJob>,
    update_tx: &Sender<LayerUpdate>,
    task: &RenderTask,
    geometry: HostGeometry,
    root_bounds: Rect,
    pages: &[PageSlot],
    revision: u64,
    seqs: &PageSequences,
) -> PassOutcome {
    if task.token.is_cancelled() {
        return PassOutcome::Cancelled;
    }

    let visible = visible_rect(geometry.window, root_bounds, geometry.dom_scale);

    // Fast path: a pure scroll within an already-rendered region ends here.
    match session.relayout(visible) {
        Ok(false) => {
            debug!("pass {:?}: relayout clean, nothing to do", task.id);
            return PassOutcome::Completed {
                stages_run: 0,
                canvas_jobs: 0,
            };
        }
        Ok(true) => {}
        Err(e) => return PassOutcome::Failed(e.to_string()),
    }

    let mut stages_run = 0usize;
    let mut canvas_jobs = 0usize;

    'pages: for slot in pages {
        if task.token.is_cancelled() {
            return PassOutcome::Cancelled;
        }

        let rect = visible_rect(geometry.window, slot.bounds, geometry.dom_scale);

        for stage in FRONT_STAGES {
            let dirty = match session.need_repaint(slot.index, rect, stage) {
                Ok(dirty) => dirty,
                Err(e) => {
                    warn!("page {}: {stage:?} dirty check failed: {e}", slot.index);
                    continue 'pages;
                }
            };
            if !dirty {
                continue;
            }

            clock.wait_frame();
            if task.token.is_cancelled() {
                return PassOutcome::Cancelled;
            }

            if let Err(e) = execute_front_stage(session, update_tx, task.id, slot, rect, stage) {
                // One page's failure never aborts the others.
                warn!("page {}: {stage:?} failed: {e}", slot.index);
                continue 'pages;
            }
            stages_run += 1;
        }

        if task.token.is_cancelled() {
            return PassOutcome::Cancelled;
        }

        let prepare_dirty =
            match session.need_repaint(slot.index, rect, RepaintStage::PrepareCanvas) {
                Ok(dirty) => dirty,
                Err(e) => {
                    warn!("page {}: PrepareCanvas dirty check failed: {e}", slot.index);
                    continue;
                }
            };
        let canvas_dirty = match session.need_repaint(slot.index, rect, RepaintStage::Canvas) {
            Ok(dirty) => dirty,
            Err(e) => {
                warn!("page {}: Canvas dirty check failed: {e}", slot.index);
                continue;
            }
        };

        if prepare_dirty || canvas_dirty {
            clock.wait_frame();
            if task.token.is_cancelled() {
                return PassOutcome::Cancelled;
            }

            // Fire and forget: the chain outlives this loop iteration but
            // still honors the shared token, and its commit is guarded by
            // the page sequence captured here.
            let seq = seqs.next(slot.index);
            let sent = canvas_tx.send(CanvasJob::Chain {
                task: task.clone(),
                page: slot.index,
                rect,
                seq,
                revision,
                width_px: slot.width_px,
                height_px: slot.height_px,
                prepare_dirty,
            });
            if sent.is_err() {
                warn!("canvas worker gone, page {} chain dropped", slot.index);
                continue;
            }
            canvas_jobs += 1;
        }
    }

    PassOutcome::Completed {
        stages_run,
        canvas_jobs,
    }
}

fn execute_front_stage(
    session: &RenderSession,
    update_tx: &Sender<LayerUpdate>,
    pass: PassId,
    slot: &PageSlot,
    rect: Rect,
    stage: RepaintStage,
) -> Result<(), crate::session::SessionError> {
    match stage {
        RepaintStage::Layout => {
            session.repaint_layout(slot.index, rect)?;
        }
        RepaintStage::Svg => {
            // The vector window is doc-global; rebase the page-local rect.
            let svg = session.render_svg_diff(rect.translate(0.0, slot.doc_top))?;
            let _ = update_tx.send(LayerUpdate::Vector {
                pass,
                page: slot.index,
                svg,
            });
        }
        RepaintStage::Semantics => {
            let semantics = session.repaint_semantics(slot.index, rect)?;
            let _ = update_tx.send(LayerUpdate::Semantics {
                pass,
                page: slot.index,
                semantics,
            });
        }
        RepaintStage::PrepareCanvas | RepaintStage::Canvas => {
            unreachable!("canvas stages run on the worker")
        }
    }
    Ok(())
}

/// Canvas worker loop: runs the PrepareCanvas then Canvas chain for one
/// page per job, off the per-frame critical path. Every job is answered
/// with either a commit or a skip so the host can track quiescence.
pub(crate) fn canvas_worker(
    session: Arc<RenderSession>,
    cache: Arc<Mutex<RasterCache>>,
    jobs: Receiver<CanvasJob>,
    update_tx: Sender<LayerUpdate>,
) {
    for job in jobs {
        match job {
            CanvasJob::Shutdown => break,
            CanvasJob::Chain {
                task,
                page,
                rect,
                seq,
                revision,
                width_px,
                height_px,
                prepare_dirty,
            } => {
                let skip = |reason: &str| {
                    debug!("page {page} canvas chain skipped: {reason}");
                    let _ = update_tx.send(LayerUpdate::CanvasSkipped {
                        pass: task.id,
                        page,
                        seq,
                    });
                };

                if task.token.is_cancelled() {
                    skip("cancelled before chain");
                    continue;
                }

                let key = RasterKey {
                    revision,
                    page,
                    width_px,
                    height_px,
                };
                let cached = cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&key);
                if let Some(pixels) = cached {
                    let _ = update_tx.send(LayerUpdate::Canvas {
                        pass: task.id,
                        page,
                        seq,
                        pixels,
                    });
                    continue;
                }

                if prepare_dirty {
                    if let Err(e) = session.prepare_canvas(page, rect) {
                        warn!("page {page}: PrepareCanvas failed: {e}");
                        skip("prepare failed");
                        continue;
                    }
                }

                // Not preemptible mid-call; the token only gates the next one.
                if task.token.is_cancelled() {
                    skip("cancelled between prepare and paint");
                    continue;
                }

                match session.repaint_canvas(page, rect) {
                    Ok(pixels) => {
                        let shared = cache
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(key, pixels);
                        let _ = update_tx.send(LayerUpdate::Canvas {
                            pass: task.id,
                            page,
                            seq,
                            pixels: shared,
                        });
                    }
                    Err(e) => {
                        warn!("page {page}: Canvas failed: {e}");
                        skip("paint failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_bump_and_report() {
        let seqs = PageSequences::new(2);
        assert_eq!(seqs.current(0), 0);
        assert_eq!(seqs.next(0), 1);
        assert_eq!(seqs.next(0), 2);
        assert_eq!(seqs.current(0), 2);
        assert_eq!(seqs.current(1), 0);
    }

    #[test]
    fn sequences_grow_on_demand() {
        let seqs = PageSequences::new(1);
        assert_eq!(seqs.next(3), 1);
        assert_eq!(seqs.current(3), 1);
    }

    #[test]
    fn sequences_survive_page_count_growth() {
        let seqs = PageSequences::new(2);
        seqs.next(1);
        seqs.ensure_pages(3);
        assert_eq!(seqs.current(1), 1);
        assert_eq!(seqs.current(2), 0);
    }
}
