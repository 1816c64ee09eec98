//! Cross-page link wiring and annotation activation

use std::sync::{Arc, Mutex};
use std::time::Duration;

use velum::clock::CountingClock;
use velum::geometry::{Point, Size, Transform};
use velum::kernel::MutateAction;
use velum::layers::LinkAction;
use velum::session::RenderSession;
use velum::test_utils::{FakeKernel, artifact};
use velum::types::{Annotation, AnnotationAction};
use velum::{AnnotationTarget, DocumentView, HostGeometry, MountOptions};

fn geometry() -> HostGeometry {
    HostGeometry::new(Size::new(800.0, 1000.0), Point::new(0.0, 0.0), 1.0)
}

fn goto(dest: usize) -> Annotation {
    Annotation {
        transform: Transform::translate(10.0, 20.0),
        size: Size::new(100.0, 12.0),
        action: AnnotationAction::GoTo { page: dest },
    }
}

fn url(target: &str) -> Annotation {
    Annotation {
        transform: Transform::translate(10.0, 40.0),
        size: Size::new(100.0, 12.0),
        action: AnnotationAction::Url {
            url: target.to_string(),
        },
    }
}

fn mount(kernel: &Arc<FakeKernel>, options: MountOptions) -> DocumentView {
    let session = RenderSession::create(kernel.clone(), None).expect("create session");
    session
        .manipulate(
            MutateAction::Reset,
            &artifact::pages(&[(600.0, 800.0), (600.0, 500.0)]),
        )
        .expect("reset");
    DocumentView::mount(session, geometry(), options).expect("mount")
}

fn options() -> MountOptions {
    MountOptions::new(600.0).with_clock(Arc::new(CountingClock::new()))
}

#[test]
fn forward_goto_wires_once_the_destination_mounts() {
    let kernel = Arc::new(FakeKernel::new());
    // Page 0 links to page 1, which mounts after it.
    kernel.set_annotations(0, vec![goto(1)]);
    let view = mount(&kernel, options());

    let boxes = &view.pages()[0].annotations.boxes;
    assert_eq!(boxes.len(), 1);
    // The on-screen box comes from the annotation's transform.
    assert_eq!(boxes[0].rect.lo, Point::new(10.0, 20.0));
    assert_eq!(boxes[0].rect.hi, Point::new(110.0, 32.0));

    let LinkAction::GoTo { page, anchor } = &boxes[0].action else {
        panic!("expected a GoTo action");
    };
    assert_eq!(*page, 1);
    assert!(view.anchor_registry().is_wired(anchor));
    assert!(view.pages()[1].annotations.anchors.contains(anchor));

    assert_eq!(
        view.open_annotation(0, 0).expect("activate"),
        AnnotationTarget::Scroll {
            page: 1,
            offset: 800.0
        }
    );
}

#[test]
fn backward_goto_wires_immediately() {
    let kernel = Arc::new(FakeKernel::new());
    kernel.set_annotations(1, vec![goto(0)]);
    let view = mount(&kernel, options());

    let LinkAction::GoTo { anchor, .. } = &view.pages()[1].annotations.boxes[0].action else {
        panic!("expected a GoTo action");
    };
    assert!(view.anchor_registry().is_wired(anchor));
    assert!(view.pages()[0].annotations.anchors.contains(anchor));

    assert_eq!(
        view.open_annotation(1, 0).expect("activate"),
        AnnotationTarget::Scroll {
            page: 0,
            offset: 0.0
        }
    );
}

#[test]
fn goto_to_a_never_mounted_page_stays_quietly_unwired() {
    let kernel = Arc::new(FakeKernel::new());
    kernel.set_annotations(0, vec![goto(9)]);
    let view = mount(&kernel, options());

    // The link element exists; its anchor just is not wired.
    let LinkAction::GoTo { anchor, .. } = &view.pages()[0].annotations.boxes[0].action else {
        panic!("expected a GoTo action");
    };
    assert!(!view.anchor_registry().is_wired(anchor));
    assert_eq!(
        view.open_annotation(0, 0).expect("activate"),
        AnnotationTarget::Unwired
    );
}

#[test]
fn url_annotation_goes_through_the_opener_hook() {
    let kernel = Arc::new(FakeKernel::new());
    kernel.set_annotations(0, vec![url("https://example.com/spec")]);

    let opened: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = opened.clone();
    let view = mount(
        &kernel,
        options().with_url_opener(Arc::new(move |target: &str| {
            sink.lock().expect("opened list").push(target.to_string());
        })),
    );

    assert_eq!(
        view.open_annotation(0, 0).expect("activate"),
        AnnotationTarget::Opened
    );
    assert_eq!(
        opened.lock().expect("opened list").as_slice(),
        ["https://example.com/spec"]
    );
}

#[test]
fn anchors_survive_an_incremental_semantics_refresh() {
    let kernel = Arc::new(FakeKernel::new());
    kernel.set_annotations(0, vec![goto(1)]);
    let mut view = mount(&kernel, options());
    assert!(view.wait_idle(Duration::from_secs(5)));

    // The semantics stage re-reported the same annotations; the wire
    // still resolves.
    let LinkAction::GoTo { anchor, .. } = &view.pages()[0].annotations.boxes[0].action else {
        panic!("expected a GoTo action");
    };
    assert!(view.anchor_registry().is_wired(anchor));
    assert_eq!(
        view.open_annotation(0, 0).expect("activate"),
        AnnotationTarget::Scroll {
            page: 1,
            offset: 800.0
        }
    );
}

#[test]
fn out_of_range_annotation_index_is_a_config_error() {
    let kernel = Arc::new(FakeKernel::new());
    let view = mount(&kernel, options());
    assert!(view.open_annotation(0, 42).is_err());
    assert!(view.open_annotation(42, 0).is_err());
}
