//! Client-side navigation and the anti-flicker mask, driven through the
//! public entry points on a virtual clock.

use std::cell::Cell;
use std::rc::Rc;

use patchkit::apply::{ApplyOptions, PatchEngine, apply_payload};
use patchkit::core::css::select_first;
use patchkit::core::ops::{Operation, Payload};
use patchkit::io::config::EngineConfig;
use patchkit::runtime::mask::{AntiFlickerMask, MaskEventKind, MaskOutcome, is_masked};
use patchkit::core::dom::MutationRecord;
use patchkit::runtime::page::{HistoryMethod, MutationCallback, NavFn, ObserveOptions, Page};
use patchkit::runtime::spa::{SpaConfig, SpaController, SpaState};
use patchkit::test_support::{TEST_URL, node, page_from};

const SHELL: &str = r#"<html><head></head><body><main id="app"><h1 id="headline">Shop</h1><button id="buy" class="btn">Buy</button></main></body></html>"#;

fn payload() -> Payload {
    Payload::new(vec![
        Operation::TextReplace {
            selector: "#headline".to_string(),
            text: "Autumn sale".to_string(),
        },
        Operation::ClassAdd {
            selector: "#buy".to_string(),
            class_name: "btn-hot".to_string(),
        },
    ])
    .with_mask(vec!["#headline".to_string()])
}

fn headline(page: &Page) -> String {
    page.document().text_content(node(page.document(), "#headline"))
}

fn spa_options() -> ApplyOptions {
    ApplyOptions {
        spa: true,
        ..ApplyOptions::default()
    }
}

fn lifted(page: &Page) -> Vec<MaskOutcome> {
    page.mask_events()
        .iter()
        .filter_map(|event| match event.kind {
            MaskEventKind::Lifted { outcome } => Some(outcome),
            MaskEventKind::Engaged { .. } => None,
        })
        .collect()
}

#[test]
fn route_change_and_rerender_are_patched_within_the_settle_window() {
    let mut page = page_from(SHELL);
    let (report, controller) = apply_payload(&mut page, &payload(), &spa_options());
    assert!(report.success);
    let mut controller = controller.expect("spa controller");
    assert_eq!(headline(&page), "Autumn sale");

    page.push_state("/category/shoes");
    page.rerender_body(
        r#"<main id="app"><h1 id="headline">Shoes</h1><button id="buy" class="btn">Buy</button></main>"#,
    );
    assert_eq!(headline(&page), "Shoes");

    // Debounce plus navigation delay, with room to spare.
    page.advance(300);
    assert_eq!(headline(&page), "Autumn sale");
    let buy = node(page.document(), "#buy");
    assert!(page.document().has_class(buy, "btn-hot"));
    assert_eq!(controller.reapply_count(), 1);

    controller.disable(&mut page);
    page.push_state("/category/hats");
    page.rerender_body(r#"<h1 id="headline">Hats</h1>"#);
    page.advance(1_000);
    assert_eq!(headline(&page), "Hats");
}

#[test]
fn reapply_after_navigation_is_masked() {
    let mut page = page_from(SHELL);
    let mut engine = PatchEngine::new(EngineConfig::default());
    engine.apply_payload(&mut page, &payload(), &spa_options());
    assert_eq!(lifted(&page), vec![MaskOutcome::Released]);

    page.push_state("/category/shoes");
    page.rerender_body(r#"<main id="app"><h1 id="headline">Shoes</h1></main>"#);
    page.advance(300);
    assert_eq!(engine.spa().reapply_count(), 1);

    let engaged = page
        .mask_events()
        .iter()
        .filter(|event| matches!(event.kind, MaskEventKind::Engaged { .. }))
        .count();
    assert_eq!(engaged, 2);
    assert_eq!(lifted(&page), vec![MaskOutcome::Released, MaskOutcome::Released]);
    assert!(!is_masked(page.document(), node(page.document(), "#headline")));
}

#[test]
fn reapply_requested_during_a_pass_runs_once_more() {
    let mut page = page_from(SHELL);
    let mut controller = SpaController::new(SpaConfig::default());
    controller.enable(&mut page, payload());
    let handle = controller.handle().expect("enabled");

    let requests = Rc::new(Cell::new(0));
    let seen = Rc::clone(&requests);
    let callback: MutationCallback = Rc::new(move |page: &mut Page, _records: &[MutationRecord]| {
        if seen.get() == 0 {
            seen.set(1);
            assert!(handle.reapply_now(page));
        }
    });
    let root = page.document().root();
    page.observe_mutations(root, ObserveOptions::child_list_subtree(), callback);

    page.push_state("/next");
    page.advance(SpaConfig::default().navigation_delay_ms);
    assert_eq!(requests.get(), 1);
    assert_eq!(controller.reapply_count(), 2);
    assert_eq!(headline(&page), "Autumn sale");

    page.advance(1_000);
    assert_eq!(controller.reapply_count(), 2);
    assert!(!controller.has_pending_reapply());
}

#[test]
fn reapply_now_outside_a_pass_runs_immediately() {
    let mut page = page_from(SHELL);
    let mut controller = SpaController::new(SpaConfig::default());
    controller.enable(&mut page, payload());
    let handle = controller.handle().expect("enabled");

    assert!(handle.reapply_now(&mut page));
    assert_eq!(controller.reapply_count(), 1);
    assert_eq!(headline(&page), "Autumn sale");

    controller.disable(&mut page);
    assert!(!handle.reapply_now(&mut page));
}

#[test]
fn long_sessions_keep_the_arena_bounded() {
    let mut page = page_from(SHELL);
    let mut engine = PatchEngine::new(EngineConfig::default());
    engine.apply_payload(&mut page, &payload(), &spa_options());

    let mut first_cycle = None;
    for step in 0..200 {
        page.push_state(&format!("/page/{step}"));
        page.rerender_body(&format!(
            r#"<main id="app"><h1 id="headline">Page {step}</h1><button id="buy" class="btn">Buy</button></main>"#
        ));
        page.advance(300);
        first_cycle.get_or_insert(page.document().arena_len());
    }
    assert_eq!(engine.spa().reapply_count(), 200);
    assert_eq!(headline(&page), "Autumn sale");
    let first_cycle = first_cycle.expect("ran");
    assert!(
        page.document().arena_len() <= first_cycle * 2,
        "arena grew from {first_cycle} to {}",
        page.document().arena_len()
    );
}

#[test]
fn back_navigation_reapplies() {
    let mut page = page_from(SHELL);
    let mut engine = PatchEngine::new(EngineConfig::default());
    engine.apply_payload(&mut page, &payload(), &spa_options());
    page.push_state("/a");
    page.advance(200);
    let after_push = engine.spa().reapply_count();

    page.rerender_body(r#"<h1 id="headline">Back home</h1>"#);
    assert!(page.history_back());
    assert_eq!(page.location(), TEST_URL);
    page.advance(200);
    assert_eq!(headline(&page), "Autumn sale");
    assert_eq!(engine.spa().reapply_count(), after_push + 1);
}

#[test]
fn navigation_api_pages_use_the_navigate_event() {
    let mut page = page_from(SHELL).with_navigation_api(true);
    let native_push = page.history_entry_point(HistoryMethod::PushState);
    let mut engine = PatchEngine::new(EngineConfig::default());
    engine.apply_payload(&mut page, &payload(), &spa_options());

    // History stays untouched when the navigate event is available.
    assert!(Rc::ptr_eq(
        &page.history_entry_point(HistoryMethod::PushState),
        &native_push
    ));
    assert_eq!(page.listener_count(), 1);

    page.push_state("/deals");
    page.advance(100);
    assert!(engine.spa().reapply_count() >= 1);

    engine.disable_spa_mode(&mut page);
    assert_eq!(engine.spa().state(), SpaState::Disabled);
    assert_eq!(page.listener_count(), 0);
}

#[test]
fn foreign_history_wrapper_survives_disable() {
    let mut page = page_from(SHELL);
    let mut engine = PatchEngine::new(EngineConfig::default());
    engine.apply_payload(&mut page, &payload(), &spa_options());

    let calls = Rc::new(Cell::new(0));
    let inner = page.history_entry_point(HistoryMethod::PushState);
    let counter = Rc::clone(&calls);
    let analytics: NavFn = Rc::new(move |page: &mut Page, url: &str| {
        counter.set(counter.get() + 1);
        inner(page, url);
    });
    page.set_history_entry_point(HistoryMethod::PushState, Rc::clone(&analytics));

    engine.disable_spa_mode(&mut page);
    assert!(Rc::ptr_eq(
        &page.history_entry_point(HistoryMethod::PushState),
        &analytics
    ));

    page.rerender_body(r#"<h1 id="headline">Plain</h1>"#);
    page.push_state("/after");
    page.advance(500);
    assert_eq!(calls.get(), 1);
    assert_eq!(page.location(), "/after");
    assert_eq!(headline(&page), "Plain");
}

#[test]
fn unreleased_mask_times_out() {
    let mut page = page_from(SHELL);
    let mask = AntiFlickerMask::engage(&mut page, &["#headline".to_string()], Some(250));
    let target = node(page.document(), "#headline");
    assert!(is_masked(page.document(), target));

    page.advance(249);
    assert!(mask.is_engaged());
    page.advance(1);
    assert!(!mask.is_engaged());
    assert!(!is_masked(page.document(), target));
    assert_eq!(lifted(&page), vec![MaskOutcome::TimedOut]);

    // Late release is a no-op.
    assert!(!mask.release(&mut page));
    assert_eq!(lifted(&page).len(), 1);
}

#[test]
fn oversized_timeouts_are_clamped() {
    let mut page = page_from(SHELL);
    let mask = AntiFlickerMask::engage(&mut page, &["#app".to_string()], Some(60_000));
    page.advance(5_000);
    assert!(!mask.is_engaged());
    assert_eq!(lifted(&page), vec![MaskOutcome::TimedOut]);
}

#[test]
fn dropped_mask_lifts_at_the_next_checkpoint() {
    let mut page = page_from(SHELL);
    {
        let _mask = AntiFlickerMask::engage(&mut page, &["#buy".to_string()], None);
    }
    let buy = node(page.document(), "#buy");
    assert!(is_masked(page.document(), buy));
    page.run_microtasks();
    assert!(!is_masked(page.document(), buy));
    assert_eq!(lifted(&page), vec![MaskOutcome::Dropped]);
    assert!(
        select_first(page.document(), "style[data-patch-mask]")
            .expect("parse")
            .is_none()
    );
}
