//! Quick benchmark for compile, render and live update costs

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tether::{Batch, ObservableList, ObservableMap, Program, Registry, Renderer};

fn main() {
    let templates = vec![
        "Plain text with no mustaches",
        "<h1>{{title}}</h1>",
        "<ul>{{#each items}}<li class=\"{{kind}}\">{{name}}</li>{{/each}}</ul>",
        "{{#if user}}<p>{{user.name}} of {{team}}</p>{{else}}<p>anonymous</p>{{/if}}",
    ];

    println!("Template Compile Performance");
    println!("============================\n");

    for template in &templates {
        let iterations = 20_000;
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = Program::compile(template);
        }
        let elapsed = start.elapsed();
        println!("Template: {:60}", format!("\"{}\"", template));
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per operation: {:?}\n", elapsed / iterations);
    }

    println!("Render Performance");
    println!("==================\n");

    let data = json!({
        "title": "Hello",
        "team": "core",
        "user": {"name": "Ada"},
        "items": (0..50).map(|i| json!({"name": format!("item {i}"), "kind": "row"})).collect::<Vec<_>>(),
    });

    for template in &templates {
        let renderer = match Program::compile(template) {
            Ok(program) => Renderer::new(Arc::new(program), Registry::new()),
            Err(e) => {
                println!("  skipped: {e}");
                continue;
            }
        };
        let iterations = 2_000;
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = renderer.render(data.clone());
        }
        let elapsed = start.elapsed();
        println!("Template: {:60}", format!("\"{}\"", template));
        println!("  Per render: {:?}\n", elapsed / iterations);
    }

    println!("Live Update Performance");
    println!("=======================\n");

    let items = ObservableList::new();
    let model = ObservableMap::new();
    model.set("items", items.clone());
    let renderer = match Program::compile("<ul>{{#each items}}<li>{{.}}</li>{{/each}}</ul>") {
        Ok(program) => Renderer::new(Arc::new(program), Registry::new()),
        Err(e) => {
            println!("  skipped: {e}");
            return;
        }
    };
    let _fragment = renderer.render(model.clone());

    let pushes = 500;
    let start = Instant::now();
    for i in 0..pushes {
        items.push(i);
    }
    println!("Unbatched: {} pushes in {:?}", pushes, start.elapsed());

    items.clear();
    let start = Instant::now();
    {
        let _guard = Batch::current().guard();
        for i in 0..pushes {
            items.push(i);
        }
    }
    println!("Batched:   {} pushes in {:?}", pushes, start.elapsed());
}
