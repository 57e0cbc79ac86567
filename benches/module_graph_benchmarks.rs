//! Performance benchmarks for the module graph and request path
//!
//! Run with: cargo bench
//!
//! - Boundary search on wide graphs (one module imported by many)
//! - Boundary search on deep import chains
//! - Cyclic graphs
//! - Cached vs. uncached transforms through the dev server

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quickdev::prelude::*;

/// `/shared.ts` imported by `width` self-accepting leaves
fn wide_graph(width: usize) -> ModuleGraph {
    let mut graph = ModuleGraph::new();
    let shared = graph.ensure_entry_from_url("/shared.ts");
    for i in 0..width {
        let leaf = graph.ensure_entry_from_url(&format!("/leaf{}.ts", i));
        graph.update_module_info(leaf, [shared], Vec::<ModuleKey>::new(), true);
    }
    graph
}

/// `/m0.ts` ← `/m1.ts` ← ... ← `/m{depth}.ts`, only the root self-accepts
fn deep_graph(depth: usize, cyclic: bool) -> ModuleGraph {
    let mut graph = ModuleGraph::new();
    let keys: Vec<ModuleKey> = (0..=depth)
        .map(|i| graph.ensure_entry_from_url(&format!("/m{}.ts", i)))
        .collect();
    for i in 1..=depth {
        let accepting = i == depth;
        graph.update_module_info(keys[i], [keys[i - 1]], Vec::<ModuleKey>::new(), accepting);
    }
    if cyclic {
        graph.update_module_info(keys[0], [keys[depth]], Vec::<ModuleKey>::new(), false);
    }
    graph
}

fn bench_wide(c: &mut Criterion) {
    let mut group = c.benchmark_group("wide");
    for width in [10usize, 100, 1000] {
        let graph = wide_graph(width);
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("propagation_path", width), &graph, |b, graph| {
            b.iter(|| graph.get_hmr_propagation_path(black_box("/shared.ts")))
        });
        group.bench_with_input(BenchmarkId::new("affected_modules", width), &graph, |b, graph| {
            b.iter(|| graph.get_modules_affected_by_file(black_box("/shared.ts")))
        });
    }
    group.finish();
}

fn bench_deep(c: &mut Criterion) {
    let mut group = c.benchmark_group("deep");
    for depth in [10usize, 100, 1000] {
        let graph = deep_graph(depth, false);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("propagation_path", depth), &graph, |b, graph| {
            b.iter(|| graph.get_hmr_propagation_path(black_box("/m0.ts")))
        });

        let cyclic = deep_graph(depth, true);
        group.bench_with_input(BenchmarkId::new("cyclic", depth), &cyclic, |b, graph| {
            b.iter(|| graph.needs_full_reload(black_box("/m0.ts")))
        });
    }
    group.finish();
}

fn bench_edge_updates(c: &mut Criterion) {
    c.bench_function("update_module_info_100_deps", |b| {
        let mut graph = ModuleGraph::new();
        let root = graph.ensure_entry_from_url("/root.ts");
        let deps: Vec<ModuleKey> = (0..100)
            .map(|i| graph.ensure_entry_from_url(&format!("/dep{}.ts", i)))
            .collect();
        b.iter(|| graph.update_module_info(root, deps.iter().copied(), Vec::<ModuleKey>::new(), true))
    });
}

fn bench_requests(c: &mut Criterion) {
    let mut group = c.benchmark_group("requests");
    let source: String = (0..50)
        .map(|i| format!("import {{ v{0} }} from './dep{0}';\n", i))
        .collect();
    let files = FileMap::from_iter((0..50).map(|i| (format!("/src/dep{}.ts", i), format!("export const v{} = {};", i, i))));
    files.insert("/src/main.ts", source);

    let mut server = DevServer::new(files, DevServerConfig::default());
    server.add_plugin(StylesheetPlugin::new()).unwrap();
    server.listen().unwrap();

    group.bench_function("cached", |b| {
        server.handle_request(&VirtualRequest::get("/src/main.ts"));
        b.iter(|| server.handle_request(black_box(&VirtualRequest::get("/src/main.ts"))))
    });
    group.bench_function("uncached", |b| {
        b.iter(|| {
            server.server().invalidate_cache("/src/main.ts");
            server.handle_request(black_box(&VirtualRequest::get("/src/main.ts")))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_wide, bench_deep, bench_edge_updates, bench_requests);

criterion_main!(benches);
