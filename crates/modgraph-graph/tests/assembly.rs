mod common;

use common::Project;
use modgraph_graph::{assemble, build_graph, BuildOptions, Module, PreludeOptions, PRELUDE_PATH};
use std::sync::Arc;

fn script(path: &str) -> Arc<Module> {
    Arc::new(Module::virtual_script(path, format!("/* {} */", path)))
}

#[tokio::test]
async fn loader_comes_first_whatever_the_hook_does() {
    let project = Project::new();
    project.write("a", "import b\nimport c\n");
    project.write("b", "");
    project.write("c", "");
    let (_, loader) = project.pipeline(1);
    let entry = build_graph(
        &["a".to_string()],
        project.resolver().as_ref(),
        loader,
        &BuildOptions::default(),
    )
    .await
    .unwrap();

    let runtime = vec![script("/runtime/require.js")];
    let polyfills = vec![
        vec![script("/polyfills/console.js")],
        vec![script("/polyfills/error-guard.js"), script("/polyfills/object.js")],
    ];

    let mut seen_by_hook = Vec::new();
    let modules = assemble(entry.modules.clone(), &runtime, &polyfills, &PreludeOptions::dev(), |mut graph| {
        seen_by_hook = graph.iter().map(|m| m.path.clone()).collect();
        graph.reverse();
        graph
    });

    let paths: Vec<&str> = modules.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths[0], "/runtime/require.js");
    assert_eq!(
        &paths[1..5],
        &[
            "/polyfills/console.js",
            "/polyfills/error-guard.js",
            "/polyfills/object.js",
            PRELUDE_PATH,
        ]
    );
    assert_eq!(
        &paths[5..],
        &[
            project.path("c").as_str(),
            project.path("b").as_str(),
            project.path("a").as_str(),
        ]
    );
    // the hook only ever sees the entry graph
    assert_eq!(seen_by_hook.len(), 3);
    assert!(!seen_by_hook.iter().any(|p| p.starts_with("/runtime") || p == PRELUDE_PATH));
}

#[test]
fn hook_cannot_displace_the_loader() {
    let runtime = vec![script("/runtime/require.js")];
    let entry = vec![script("/app/main.js")];

    let modules = assemble(entry, &runtime, &[], &PreludeOptions::default(), |_| {
        vec![script("/app/injected.js")]
    });

    let paths: Vec<&str> = modules.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths, vec!["/runtime/require.js", PRELUDE_PATH, "/app/injected.js"]);
    let prelude = &modules[1].output()[0].data["code"];
    assert!(prelude.as_str().unwrap().contains("__DEV__=false"));
}
