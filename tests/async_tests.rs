//! Integration tests for async rendering: template fetches, pending data
//! sources and callback-style renders.

use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tether::{
    Deferred, Hookup, MemoryLoader, ObservableMap, PendingState, TemplateSource, TetherError,
    Value, View, ViewConfig,
};
use tokio::task::LocalSet;
use tokio::time::sleep;

fn memory_view(templates: &[(&str, &str)]) -> (View, Arc<MemoryLoader>) {
    let loader = Arc::new(MemoryLoader::with_delay(Duration::from_millis(10)));
    for (path, source) in templates {
        loader.insert(*path, *source);
    }
    (View::with_loader(ViewConfig::default(), loader.clone()), loader)
}

// ============================================================================
// Template fetches
// ============================================================================

#[tokio::test]
async fn test_concurrent_renders_fetch_once() {
    let (view, loader) = memory_view(&[("card.stache", "<div>{{title}}</div>")]);

    let (first, second) = tokio::join!(
        view.render("card.stache", json!({"title": "one"})),
        view.render("card.stache", json!({"title": "two"})),
    );
    assert_eq!(first.unwrap().fragment.inner_html(), "<div>one</div>");
    assert_eq!(second.unwrap().fragment.inner_html(), "<div>two</div>");
    assert_eq!(loader.fetch_count(), 1);
    assert_eq!(view.cache().compile_count(), 1);

    // settled templates are available without suspending
    let fragment = view.render_now("card.stache", json!({"title": "sync"})).unwrap();
    assert_eq!(fragment.inner_html(), "<div>sync</div>");
}

#[tokio::test]
async fn test_fetch_failure_surfaces_through_render() {
    let (view, _) = memory_view(&[]);
    let err = view.render("missing.stache", Value::Undefined).await.unwrap_err();
    assert!(matches!(err, TetherError::Fetch { .. }));
}

#[tokio::test]
async fn test_engine_override_for_unrecognised_extensions() {
    let (view, _) = memory_view(&[("/render/card.ejs", "<b>{{x}}</b>")]);

    let err = view.render("/render/card.ejs", json!({"x": 1})).await.unwrap_err();
    assert!(matches!(err, TetherError::UnknownEngine { .. }));

    let rendered = view
        .render(
            TemplateSource::url_with_engine("/render/card.ejs", "stache"),
            json!({"x": 1}),
        )
        .await
        .unwrap();
    assert_eq!(rendered.fragment.inner_html(), "<b>1</b>");
}

#[tokio::test]
async fn test_extensionless_paths_use_the_default_engine() {
    let loader = Arc::new(MemoryLoader::new());
    loader.insert("/render/card", "<b>{{x}}</b>");
    let config = ViewConfig::from_yaml("default_engine: mustache").unwrap();
    let view = View::with_loader(config, loader);

    let rendered = view.render("/render/card", json!({"x": 2})).await.unwrap();
    assert_eq!(rendered.fragment.inner_html(), "<b>2</b>");
}

#[tokio::test]
async fn test_filesystem_templates_resolve_against_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("partials")).unwrap();
    std::fs::write(
        dir.path().join("partials/greet.mustache"),
        "<p>Hello {{name}}</p>",
    )
    .unwrap();

    let view = View::new(ViewConfig::default().with_root(dir.path()));
    let rendered = view
        .render("partials/greet.mustache", json!({"name": "Ada"}))
        .await
        .unwrap();
    assert_eq!(rendered.fragment.inner_html(), "<p>Hello Ada</p>");
}

#[tokio::test]
async fn test_disabled_cache_fetches_per_render() {
    let loader = Arc::new(MemoryLoader::new());
    loader.insert("a.stache", "x");
    let config = ViewConfig {
        cache_templates: false,
        ..ViewConfig::default()
    };
    let view = View::with_loader(config, loader.clone());
    view.render("a.stache", Value::Undefined).await.unwrap();
    view.render("a.stache", Value::Undefined).await.unwrap();
    assert_eq!(loader.fetch_count(), 2);
}

// ============================================================================
// Pending data
// ============================================================================

#[tokio::test]
async fn test_pending_root_is_awaited() {
    let (view, _) = memory_view(&[]);
    let deferred = Deferred::new();

    let (rendered, _) = tokio::join!(view.render("<i>{{who}}</i>", &deferred), async {
        sleep(Duration::from_millis(5)).await;
        deferred.resolve(json!({"who": "later"}));
    });
    assert_eq!(rendered.unwrap().fragment.inner_html(), "<i>later</i>");
}

#[tokio::test]
async fn test_pending_properties_settle_into_a_copy() {
    let (view, _) = memory_view(&[]);
    let (user, count) = (Deferred::new(), Deferred::new());
    let data = ObservableMap::new();
    data.set("user", &user);
    data.set("count", &count);
    data.set("plain", "p");

    let (rendered, _) = tokio::join!(
        view.render("{{user}}/{{count}}/{{plain}}", data.clone()),
        async {
            sleep(Duration::from_millis(5)).await;
            count.resolve(2);
            sleep(Duration::from_millis(5)).await;
            user.resolve("ada");
        }
    );
    let rendered = rendered.unwrap();
    assert_eq!(rendered.fragment.text_content(), "ada/2/p");

    let copy = rendered.data.as_map().unwrap();
    assert!(!copy.ptr_eq(&data));
    assert_eq!(copy.get("user"), Value::from("ada"));
    assert!(matches!(data.get("user"), Value::Pending(_)));
}

#[tokio::test]
async fn test_first_rejection_fails_the_render_without_committing() {
    let (view, _) = memory_view(&[]);
    let hookups = Rc::new(Cell::new(0));
    let seen = hookups.clone();
    view.register_tag("profile", move |_, _| {
        seen.set(seen.get() + 1);
        Ok(Hookup::Handled)
    });

    let (user, perms) = (Deferred::new(), Deferred::new());
    let data = ObservableMap::new();
    data.set("user", &user);
    data.set("perms", &perms);

    let (result, _) = tokio::join!(
        view.render("<profile>{{user}}</profile>", data.clone()),
        async {
            sleep(Duration::from_millis(5)).await;
            perms.reject("permission service down");
            sleep(Duration::from_millis(5)).await;
            user.reject("too late to matter");
        }
    );
    match result {
        Err(TetherError::Resolution { message }) => {
            assert_eq!(message, "permission service down")
        }
        other => panic!("expected a resolution error, got {other:?}"),
    }
    assert_eq!(hookups.get(), 0);
}

#[tokio::test]
async fn test_pending_property_renders_placeholder_then_updates() {
    let (view, _) = memory_view(&[]);
    let name = Deferred::new();
    let data = ObservableMap::new();
    data.set("name", &name);

    let fragment = view.render_now("<p>{{name}}</p>", data).unwrap();
    assert_eq!(fragment.inner_html(), "<p></p>");
    name.resolve("Ada");
    assert_eq!(fragment.inner_html(), "<p>Ada</p>");
}

#[tokio::test]
async fn test_rejected_property_keeps_placeholder_and_binding() {
    let (view, _) = memory_view(&[]);
    let name = Deferred::new();
    let data = ObservableMap::new();
    data.set("name", &name);

    let fragment = view.render_now("<p>{{name}}</p>", data.clone()).unwrap();
    name.reject("profile service down");
    assert_eq!(fragment.inner_html(), "<p></p>");
    assert!(matches!(
        name.source().state(),
        PendingState::Rejected(reason) if reason.message() == "profile service down"
    ));

    data.set("name", "Grace");
    assert_eq!(fragment.inner_html(), "<p>Grace</p>");
}

// ============================================================================
// Callback renders
// ============================================================================

#[tokio::test]
async fn test_callback_runs_after_the_call_returns() {
    let (view, _) = memory_view(&[]);
    LocalSet::new()
        .run_until(async move {
            let order = Rc::new(RefCell::new(Vec::new()));
            let html = Rc::new(RefCell::new(String::new()));

            let (log, out) = (order.clone(), html.clone());
            let handle = view.render_with("<b>{{x}}</b>", json!({"x": 1}), move |result| {
                log.borrow_mut().push("callback");
                if let Ok(rendered) = result {
                    *out.borrow_mut() = rendered.fragment.inner_html();
                }
            });
            order.borrow_mut().push("returned");
            handle.await.unwrap();

            assert_eq!(*order.borrow(), vec!["returned", "callback"]);
            assert_eq!(*html.borrow(), "<b>1</b>");
        })
        .await;
}

#[tokio::test]
async fn test_callback_receives_errors() {
    let (view, _) = memory_view(&[]);
    LocalSet::new()
        .run_until(async move {
            let failed = Rc::new(Cell::new(false));
            let flag = failed.clone();
            view.render_with("missing.stache", Value::Undefined, move |result| {
                flag.set(matches!(result, Err(TetherError::Fetch { .. })));
            })
            .await
            .unwrap();
            assert!(failed.get());
        })
        .await;
}
