//! Integration tests for view resolution driven by the player

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use player::view::plugins::AssetTransform;
use player::{CompletedState, DataModelOptions, Flow, Player, PlayerConfig, Result, ViewInstance};

fn flow_with_view(view: Value, data: Value) -> Flow {
    serde_json::from_value(json!({
        "id": "views",
        "views": [view],
        "data": data,
        "navigation": {
            "BEGIN": "F",
            "F": {
                "startState": "S",
                "S": {"state_type": "VIEW", "ref": "v1", "transitions": {"*": "E"}},
                "E": {"state_type": "END", "outcome": "done"}
            }
        }
    }))
    .unwrap()
}

/// Start the flow and stop at its first view
fn start(player: &Player, flow: Flow) -> (BoxFuture<'_, Result<CompletedState>>, Arc<ViewInstance>) {
    let mut run = player.start(flow);
    assert!((&mut run).now_or_never().is_none());
    let view = player.controllers().unwrap().view.current_view().unwrap();
    (run, view)
}

fn counting(player: &Player, matcher: Value) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    player.transforms().set(
        matcher,
        AssetTransform::new().with_resolve(move |value, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            value
        }),
    );
    count
}

#[tokio::test]
async fn test_switch_flip_leaves_siblings_alone() {
    let player = Player::new(PlayerConfig::default(), Vec::new());
    let footer_resolves = counting(&player, json!({"type": "label"}));

    let (run, view) = start(
        &player,
        flow_with_view(
            json!({
                "id": "v1",
                "type": "form",
                "body": {"dynamicSwitch": [
                    {"case": "{{flag}}", "asset": {"id": "on", "type": "text", "value": "On"}},
                    {"case": true, "asset": {"id": "off", "type": "text", "value": "Off"}}
                ]},
                "footer": {"asset": {"id": "footer", "type": "label", "value": "static"}}
            }),
            json!({"flag": false}),
        ),
    );
    assert_eq!(view.last_update().unwrap()["body"]["asset"]["id"], json!("off"));
    assert_eq!(footer_resolves.load(Ordering::SeqCst), 1);

    player.set_data("flag", json!(true)).unwrap();
    assert_eq!(view.last_update().unwrap()["body"]["asset"]["id"], json!("off"), "not before flush");
    assert_eq!(player.flush(), 1);

    let tree = view.last_update().unwrap();
    assert_eq!(tree["body"]["asset"]["id"], json!("on"));
    assert_eq!(tree["footer"]["asset"]["value"], json!("static"));
    assert_eq!(footer_resolves.load(Ordering::SeqCst), 1, "footer reused from cache");
    drop(run);
}

#[tokio::test]
async fn test_string_refs_and_expressions_resolve() {
    let player = Player::new(PlayerConfig::default(), Vec::new());
    let (_run, view) = start(
        &player,
        flow_with_view(
            json!({
                "id": "v1",
                "title": "Hello {{user.name}}",
                "total": "@[ {{a}} + {{b}} ]@",
                "exp": "{{a}} = 100"
            }),
            json!({"user": {"name": "Ada"}, "a": 1, "b": 2}),
        ),
    );

    let tree = view.last_update().unwrap();
    assert_eq!(tree["title"], json!("Hello Ada"));
    assert_eq!(tree["total"], json!(3));
    assert_eq!(tree["exp"], json!("{{a}} = 100"), "exp properties stay raw");
}

#[tokio::test]
async fn test_dynamic_template_grows_with_its_data() {
    let player = Player::new(PlayerConfig::default(), Vec::new());
    let (_run, view) = start(
        &player,
        flow_with_view(
            json!({
                "id": "v1",
                "template": [{
                    "data": "people",
                    "output": "rows",
                    "dynamic": true,
                    "value": {"asset": {"id": "row-_index_", "type": "text", "value": "{{people._index_.name}}"}}
                }]
            }),
            json!({"people": [{"name": "Ada"}]}),
        ),
    );
    assert_eq!(view.last_update().unwrap()["rows"].as_array().map(Vec::len), Some(1));

    player.set_data("people.1", json!({"name": "Grace"})).unwrap();
    player.flush();

    let tree = view.last_update().unwrap();
    assert_eq!(
        tree["rows"],
        json!([
            {"asset": {"id": "row-0", "type": "text", "value": "Ada"}},
            {"asset": {"id": "row-1", "type": "text", "value": "Grace"}}
        ])
    );
}

#[tokio::test]
async fn test_silent_delete_waits_for_the_next_flush() {
    let player = Player::new(PlayerConfig::default(), Vec::new());
    let (_run, view) = start(
        &player,
        flow_with_view(
            json!({"id": "v1", "first": "{{items.0}}", "note": "{{note}}"}),
            json!({"items": ["a", "b"], "note": "x"}),
        ),
    );
    let data = player.controllers().unwrap().data;

    let first = data.parse("items.0").unwrap();
    assert!(data.delete(&first, &DataModelOptions::silent()));
    assert_eq!(player.flush(), 0, "silent delete schedules nothing");
    assert_eq!(view.last_update().unwrap()["first"], json!("a"));

    let missing = data.parse("nothing.here").unwrap();
    assert!(!data.delete(&missing, &DataModelOptions::default()));
    assert_eq!(player.flush(), 0, "deleting nothing schedules nothing");

    player.set_data("note", json!("y")).unwrap();
    assert_eq!(player.flush(), 1);
    let tree = view.last_update().unwrap();
    assert_eq!(tree["first"], json!("b"));
    assert_eq!(tree["note"], json!("y"));
}

#[tokio::test]
async fn test_applicability_hides_and_shows() {
    let player = Player::new(PlayerConfig::default(), Vec::new());
    let (_run, view) = start(
        &player,
        flow_with_view(
            json!({
                "id": "v1",
                "warning": {"asset": {"id": "warn", "type": "text", "applicability": "{{show}}"}}
            }),
            json!({"show": false}),
        ),
    );
    assert!(view.last_update().unwrap().get("warning").is_none());

    player.set_data("show", json!(true)).unwrap();
    player.flush();
    assert_eq!(view.last_update().unwrap()["warning"]["asset"]["id"], json!("warn"));
}

#[tokio::test]
async fn test_each_view_state_gets_a_fresh_view() {
    let player = Player::new(PlayerConfig::default(), Vec::new());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    player.hooks.view.tap("record", move |view| sink.lock().push(view.id.clone()));

    let flow: Flow = serde_json::from_value(json!({
        "id": "two-views",
        "views": [{"id": "first"}, {"id": "second"}],
        "navigation": {
            "BEGIN": "F",
            "F": {
                "startState": "A",
                "A": {"state_type": "VIEW", "ref": "first", "transitions": {"*": "B"}},
                "B": {"state_type": "VIEW", "ref": "second", "transitions": {"*": "E"}},
                "E": {"state_type": "END", "outcome": "done"}
            }
        }
    }))
    .unwrap();

    let mut run = player.start(flow);
    assert!((&mut run).now_or_never().is_none());
    player.transition("next").unwrap();
    assert!((&mut run).now_or_never().is_none());
    player.transition("next").unwrap();

    assert_eq!(run.await.unwrap().end_state.outcome, "done");
    assert_eq!(*seen.lock(), vec!["first".to_string(), "second".to_string()]);
}
