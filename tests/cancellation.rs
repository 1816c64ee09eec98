//! Preemption: a newer pass supersedes an older one without mixing states

use std::sync::Arc;
use std::time::Duration;

use velum::clock::CountingClock;
use velum::geometry::{Point, Size};
use velum::kernel::MutateAction;
use velum::session::RenderSession;
use velum::task::PassOutcome;
use velum::test_utils::{FakeKernel, artifact};
use velum::{DocumentView, HostGeometry, MountOptions};

const IDLE: Duration = Duration::from_secs(10);

fn geometry() -> HostGeometry {
    HostGeometry::new(Size::new(800.0, 1000.0), Point::new(0.0, 0.0), 1.0)
}

fn two_pages() -> Vec<u8> {
    artifact::pages(&[(600.0, 800.0), (600.0, 800.0)])
}

fn mount(kernel: &Arc<FakeKernel>) -> DocumentView {
    let session = RenderSession::create(kernel.clone(), None).expect("create session");
    session
        .manipulate(MutateAction::Reset, &two_pages())
        .expect("reset");
    DocumentView::mount(
        session,
        geometry(),
        MountOptions::new(600.0).with_clock(Arc::new(CountingClock::new())),
    )
    .expect("mount")
}

#[test]
fn superseding_pass_cancels_the_running_one() {
    let kernel = Arc::new(FakeKernel::new());
    // Slow front stages so the first pass is still mid-ladder when the
    // second one arrives.
    kernel.set_stage_delay(Duration::from_millis(25));

    let mut view = mount(&kernel);

    // Mutate and reload while the cold pass is still grinding.
    view.session()
        .manipulate(MutateAction::Merge, &two_pages())
        .expect("merge");
    view.reload().expect("reload");

    assert!(view.wait_idle(IDLE));

    let outcomes = view.pass_outcomes();
    assert!(
        outcomes
            .iter()
            .any(|(_, o)| matches!(o, PassOutcome::Cancelled)),
        "the first pass should have been superseded: {outcomes:?}"
    );
    assert!(matches!(
        outcomes.last(),
        Some((_, PassOutcome::Completed { .. }))
    ));

    // Exactly one fully-applied final state per page: every surface
    // shows the merged revision, never a mix of the two passes.
    for page in view.pages() {
        assert!(
            page.raster.pixels.pixels.iter().all(|b| *b == 2),
            "page {} shows mixed content",
            page.index
        );
    }
}

#[test]
fn stale_canvas_chain_cannot_overwrite_a_newer_pass() {
    let kernel = Arc::new(FakeKernel::new());
    // Slow canvas setup: the cold pass dispatches its chains and the
    // worker is still inside PrepareCanvas when the pass is superseded.
    kernel.set_canvas_delay(Duration::from_millis(40));

    let mut view = mount(&kernel);

    // Give the driver a moment to dispatch the cold chains.
    std::thread::sleep(Duration::from_millis(5));

    view.session()
        .manipulate(MutateAction::Merge, &two_pages())
        .expect("merge");
    view.reload().expect("reload");

    assert!(view.wait_idle(IDLE));

    // Only the second pass's chains rasterized; the first pass's were
    // skipped at the token checks around the chain.
    assert_eq!(kernel.canvas_paints(), 2);
    for page in view.pages() {
        assert!(
            page.raster.pixels.pixels.iter().all(|b| *b == 2),
            "page {} shows a stale canvas commit",
            page.index
        );
    }
}

#[test]
fn rapid_viewport_changes_settle_on_the_last_one() {
    let kernel = Arc::new(FakeKernel::new());
    kernel.set_stage_delay(Duration::from_millis(10));

    let mut view = mount(&kernel);

    for scroll in [100.0, 200.0, 300.0] {
        view.on_viewport_change(HostGeometry::new(
            Size::new(800.0, 1000.0),
            Point::new(0.0, -scroll),
            1.0,
        ))
        .expect("viewport");
    }

    assert!(view.wait_idle(IDLE));
    // However many passes were cancelled, the last one completed.
    assert!(matches!(
        view.last_pass_outcome(),
        Some(PassOutcome::Completed { .. })
    ));
}
