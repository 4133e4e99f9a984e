#![allow(dead_code)]

use criterion::{criterion_group, criterion_main, Criterion};
use modwire::{BindingKey, Config, Container, Injectable, Injection, Module, ModuleSetup, ModuleTerm, SetupErrorKind};
use std::sync::Arc;
use tokio::runtime::Runtime;

struct A(Arc<B>, Arc<C>);
struct B(i32);
struct C(Arc<CA>);
struct CA(Arc<CAA>);
struct CAA;

impl Injectable for A {
    fn injection() -> Injection<Self> {
        Injection::new(|mut args| Ok(A(args.take()?, args.take()?)))
            .arg("b", BindingKey::of::<B>())
            .arg("c", BindingKey::of::<C>())
    }
}

impl Injectable for B {
    fn injection() -> Injection<Self> {
        Injection::new(|_| Ok(B(2)))
    }
}

impl Injectable for C {
    fn injection() -> Injection<Self> {
        Injection::new(|mut args| Ok(C(args.take()?))).arg("ca", BindingKey::of::<CA>())
    }
}

impl Injectable for CA {
    fn injection() -> Injection<Self> {
        Injection::new(|mut args| Ok(CA(args.take()?))).arg("caa", BindingKey::of::<CAA>())
    }
}

impl Injectable for CAA {
    fn injection() -> Injection<Self> {
        Injection::new(|_| Ok(CAA))
    }
}

#[derive(Default)]
struct Leaves;

#[modwire::async_trait]
impl ModuleSetup for Leaves {
    async fn setup(&self, module: &Module) -> Result<(), SetupErrorKind> {
        module.bind().sync_singleton_class::<CAA>()?;
        module.bind().sync_singleton_class::<CA>()?;
        module.bind().sync_singleton_class::<B>()?;
        module.bind().singleton_class_as::<B>("b:async")?;
        module.bind().sync_functional_with("counter", Config::transient(), |_| Ok(0_u64))?;
        module.export([BindingKey::of::<CA>(), BindingKey::of::<B>(), BindingKey::name("b:async")])?;
        Ok(())
    }
}

#[derive(Default)]
struct Root;

#[modwire::async_trait]
impl ModuleSetup for Root {
    async fn setup(&self, module: &Module) -> Result<(), SetupErrorKind> {
        module.import([ModuleTerm::new::<Leaves>()]).await?;
        module.bind().sync_singleton_class::<C>()?;
        module.bind().sync_singleton_class::<A>()?;
        module.alias(BindingKey::of::<A>(), "a")?;
        Ok(())
    }
}

/// Modules only hold their container weakly, so the container is kept alongside.
#[inline]
fn container_new(runtime: &Runtime) -> (Container, Module) {
    let container = Container::new();
    let module = runtime.block_on(container.register::<Root>()).unwrap();
    (container, module)
}

#[inline]
fn module_provide(module: &Module) {
    let _ = module.provide_sync::<A>(BindingKey::of::<A>()).unwrap();
}

#[inline]
fn module_provide_alias(module: &Module) {
    let _ = module.provide_sync::<A>("a").unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let (container, module) = container_new(&runtime);
    let leaves = container.get_module::<Leaves>().unwrap();

    c.bench_function("container_new", |b| b.iter(|| container_new(&runtime)))
        .bench_function("module_provide_first", |b| {
            b.iter(|| {
                let (_container, module) = container_new(&runtime);
                module_provide(&module);
            })
        })
        .bench_function("module_provide_with_cache", |b| b.iter(|| module_provide(&module)))
        .bench_function("module_provide_alias", |b| b.iter(|| module_provide_alias(&module)))
        .bench_function("module_provide_transient", |b| {
            b.iter(|| {
                let _ = leaves.provide_sync::<u64>("counter").unwrap();
            })
        })
        .bench_function("module_provide_async_with_cache", |b| {
            b.to_async(&runtime)
                .iter(|| async { module.provide_async::<B>("b:async").await.unwrap() })
        });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
