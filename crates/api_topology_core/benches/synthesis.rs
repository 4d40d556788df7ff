//! Synthesis benchmarks for large endpoint tables.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use api_topology_core::endpoints::{
    resolve_endpoints, AuthorizerId, EndpointDescriptor, FunctionHandle, HttpMethod,
};
use api_topology_core::profile::TopologyProfile;
use api_topology_core::template::render_template;
use api_topology_core::test_helpers::{assembled_topology, dev_stage, StaticArtifacts};
use api_topology_core::topology::{assemble_topology, EndpointConfig, FunctionConfig};

fn table(resources: usize) -> Vec<EndpointDescriptor> {
    (0..resources)
        .flat_map(|index| {
            [
                EndpointDescriptor::new(
                    format!("/r{index}"),
                    HttpMethod::Get,
                    FunctionHandle(index),
                    false,
                ),
                EndpointDescriptor::new(
                    format!("/r{index}/{{id}}"),
                    HttpMethod::Put,
                    FunctionHandle(index),
                    true,
                ),
            ]
        })
        .collect()
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_endpoints");
    for resources in [10, 100, 500] {
        let descriptors = table(resources);
        group.bench_with_input(
            BenchmarkId::from_parameter(resources),
            &descriptors,
            |b, descriptors| {
                b.iter(|| black_box(resolve_endpoints(descriptors, Some(AuthorizerId(0)))));
            },
        );
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_template");
    group.bench_function("full_profile", |b| {
        let topology = assembled_topology(TopologyProfile::Full);
        b.iter(|| black_box(render_template(&topology)));
    });

    for resources in [50, 200] {
        let mut config = TopologyProfile::Full.config("bench-api", &dev_stage());
        for index in 0..resources {
            let function = format!("handler_{index}");
            config.functions.push(FunctionConfig::new(function.clone()));
            config.endpoints.push(EndpointConfig::new(
                &format!("/items{index}/{{itemId}}"),
                HttpMethod::Get,
                &function,
                true,
            ));
        }
        let topology = assemble_topology(&config, &StaticArtifacts::all_built())
            .expect("bench topology should assemble");
        group.bench_with_input(
            BenchmarkId::from_parameter(resources),
            &topology,
            |b, topology| {
                b.iter(|| black_box(render_template(topology)));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_render);
criterion_main!(benches);
