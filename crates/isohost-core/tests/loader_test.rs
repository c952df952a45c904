//! Loading: isolation boundaries, dependency resolution and unwinding.

mod common;

use std::sync::Arc;

use common::*;
use isohost_core::prelude::*;
use isohost_core::sdk::semver::{Version, VersionReq};
use isohost_core::sdk::DependencyOrigin;
use isohost_core::{AssemblyLoader, HostModule, IsolatedAssemblyLoader, LoadContext, LoadError};

fn req(text: &str) -> VersionReq {
    VersionReq::parse(text).unwrap()
}

/// `fmtlib` at `version`, registering its banner as a plugin-local service.
fn fmtlib_image(version: Version) -> ModuleImage {
    let banner = format!("fmtlib {version}");
    ModuleImage::new(ModuleManifest::new("fmtlib", version)).with_bootstrap(move |registry, _| {
        registry.insert("fmtlib.banner", banner.clone());
        Ok(())
    })
}

/// A widget module whose widget is named after the `fmtlib` it was given.
fn banner_widget_image(name: &str, requirement: &str) -> ModuleImage {
    let manifest = widget_manifest(name, &["Widget"])
        .with_dependency(DependencyRef::new("fmtlib", req(requirement)));
    ModuleImage::new(manifest).with_factory(format!("{name}.Widget"), |scope| {
        let banner = scope.require::<String>("fmtlib.banner")?;
        Ok(Box::new(TestWidget::named(&banner)))
    })
}

fn context_for(path: &std::path::Path) -> LoadContext {
    let mut cx = LoadContext::for_contract(path, &WidgetContract::info(), isohost_core::sdk::HOST_FRAMEWORK);
    cx.set_ignore_platform_inconsistencies(true);
    cx
}

#[tokio::test]
async fn test_private_dependency_versions_are_isolated() {
    let fx = Fixture::new();
    fx.install("pluginA", "fmtlib.so", fmtlib_image(Version::new(1, 4, 0)));
    fx.install("pluginB", "fmtlib.so", fmtlib_image(Version::new(2, 0, 1)));
    fx.install("pluginA", "pluginA.so", banner_widget_image("pluginA", "^1"));
    fx.install("pluginB", "pluginB.so", banner_widget_image("pluginB", "^2"));

    let loader = fx.loader();
    let found = loader.find_plugins::<WidgetContract>(fx.root()).await.unwrap();
    assert_eq!(found.len(), 2);

    let a = loader.load_plugin::<WidgetContract>(&found[0], LoadOptions::new()).await.unwrap();
    let b = loader.load_plugin::<WidgetContract>(&found[1], LoadOptions::new()).await.unwrap();

    assert_eq!(a.get_name().await.unwrap().text, "fmtlib 1.4.0");
    assert_eq!(b.get_name().await.unwrap().text, "fmtlib 2.0.1");
    assert_ne!(a.0.boundary_id(), b.0.boundary_id());
}

#[tokio::test]
async fn test_linked_dependencies_record_origin() {
    let fx = Fixture::new();
    fx.install("pluginA", "fmtlib.so", fmtlib_image(Version::new(1, 4, 0)));
    let path = fx.install("pluginA", "pluginA.so", banner_widget_image("pluginA", "^1"));

    let loader = IsolatedAssemblyLoader::new(Arc::new(fx.backend.clone()));
    let module = loader.load(context_for(&path)).await.unwrap();

    let contract = module
        .dependencies()
        .iter()
        .find(|d| d.name == CONTRACT_MODULE)
        .unwrap();
    assert_eq!(contract.origin, DependencyOrigin::Host);
    assert_eq!(contract.version, Version::new(1, 2, 0));

    let fmtlib = module.dependencies().iter().find(|d| d.name == "fmtlib").unwrap();
    assert!(fmtlib.is_private());
    assert_eq!(fmtlib.version, Version::new(1, 4, 0));
    assert_eq!(
        fmtlib.origin,
        DependencyOrigin::Private(fx.root().join("pluginA").join("fmtlib.so"))
    );

    // The private copy is opened first, the plugin module last.
    assert_eq!(module.boundary().module_names(), vec!["fmtlib", "pluginA"]);
    assert_eq!(fx.backend.live_modules(), 2);

    drop(module);
    assert_eq!(fx.backend.live_modules(), 0);
}

#[tokio::test]
async fn test_lib_prefixed_dependency_is_found() {
    let fx = Fixture::new();
    fx.install("pluginA", "libfmtlib.so", fmtlib_image(Version::new(1, 9, 0)));
    fx.install("pluginA", "pluginA.so", banner_widget_image("pluginA", "^1"));

    let loader = fx.loader();
    let scan = loader
        .find_exactly_one::<WidgetContract>(fx.root(), Some("pluginA"))
        .await
        .unwrap();
    let widget = loader.load_plugin::<WidgetContract>(&scan, LoadOptions::new()).await.unwrap();
    assert_eq!(widget.get_name().await.unwrap().text, "fmtlib 1.9.0");
}

#[tokio::test]
async fn test_unresolved_dependency_unwinds_partial_load() {
    let fx = Fixture::new();
    fx.install("pluginC", "fmtlib.so", fmtlib_image(Version::new(1, 4, 0)));
    let manifest = widget_manifest("pluginC", &["Widget"])
        .with_dependency(DependencyRef::new("fmtlib", req("^1")))
        .with_dependency(DependencyRef::new("missinglib", req("^1")));
    let image = widget_image(manifest, TestWidget::named("c"));
    fx.install("pluginC", "pluginC.so", image);

    let scan = fx.scan_result("pluginC", "pluginC.so", TypeDescriptor::new("pluginC", "Widget"));
    let err = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .err()
        .unwrap();

    match err {
        Error::Load(LoadError::UnresolvedDependency { dependency, search_dir, .. }) => {
            assert_eq!(dependency, "missinglib");
            assert_eq!(search_dir, fx.root().join("pluginC"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.backend.total_opened(), 1);
    assert_eq!(fx.backend.live_modules(), 0);
}

#[tokio::test]
async fn test_dependency_with_wrong_version_is_not_bound() {
    let fx = Fixture::new();
    fx.install("pluginA", "fmtlib.so", fmtlib_image(Version::new(2, 0, 1)));
    fx.install("pluginA", "pluginA.so", banner_widget_image("pluginA", "^1"));

    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));
    let err = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Load(LoadError::UnresolvedDependency { .. })
    ));
    assert_eq!(fx.backend.total_opened(), 0);
}

#[tokio::test]
async fn test_failed_bootstrap_unwinds_boundary() {
    let fx = Fixture::new();
    fx.install("pluginA", "fmtlib.so", fmtlib_image(Version::new(1, 4, 0)));
    let manifest = widget_manifest("pluginA", &["Widget"])
        .with_dependency(DependencyRef::new("fmtlib", req("^1")));
    let image = widget_image(manifest, TestWidget::named("a"))
        .with_bootstrap(|_, _| Err(BoundaryFault::new("ConfigurationError", "no settings file")));
    fx.install("pluginA", "pluginA.so", image);

    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));
    let err = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .err()
        .unwrap();

    match err {
        Error::Load(LoadError::Bootstrap { module, fault_type, .. }) => {
            assert_eq!(module, "pluginA");
            assert_eq!(fault_type, "ConfigurationError");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.backend.total_opened(), 2);
    assert_eq!(fx.backend.live_modules(), 0);
}

#[tokio::test]
async fn test_platform_mismatch_strict_and_ignored() {
    let fx = Fixture::new();
    let manifest = widget_manifest("pluginA", &["Widget"]).with_target_framework("legacy/4.8");
    fx.install("pluginA", "pluginA.so", widget_image(manifest, TestWidget::named("a")));
    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));

    let err = fx
        .loader()
        .with_ignore_platform_inconsistencies(false)
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .err()
        .unwrap();
    match err {
        Error::Load(LoadError::IncompatiblePlatform { expected, found, .. }) => {
            assert_eq!(expected, isohost_core::sdk::HOST_FRAMEWORK);
            assert_eq!(found, "legacy/4.8");
        }
        other => panic!("unexpected error: {other}"),
    }

    // The default tolerates the mismatch.
    let widget = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .unwrap();
    assert_eq!(widget.get_name().await.unwrap().text, "a");
}

#[tokio::test]
async fn test_configure_callback_overrides_defaults() {
    let fx = Fixture::new();
    let manifest = widget_manifest("pluginA", &["Widget"]).with_target_framework("legacy/4.8");
    fx.install("pluginA", "pluginA.so", widget_image(manifest, TestWidget::named("a")));
    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));

    let options = LoadOptions::new().configure(|cx| {
        cx.set_ignore_platform_inconsistencies(false);
    });
    let err = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, options)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Load(LoadError::IncompatiblePlatform { .. })));
}

#[tokio::test]
async fn test_missing_module_file() {
    let fx = Fixture::new();
    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));

    let err = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .err()
        .unwrap();
    match err {
        Error::Load(LoadError::ModuleNotFound(path)) => {
            assert_eq!(path, fx.root().join("pluginA").join("pluginA.so"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_shared_dependency_needs_matching_host_module() {
    let fx = Fixture::new();
    let manifest = ModuleManifest::new("pluginA", Version::new(1, 0, 0))
        .with_type(
            DeclaredType::new(TypeDescriptor::new("pluginA", "Widget")).implementing(widget_contract()),
        )
        .with_dependency(
            DependencyRef::new(CONTRACT_MODULE, req("^2")).with_export(widget_contract()),
        );
    fx.install("pluginA", "pluginA.so", widget_image(manifest, TestWidget::named("a")));
    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));

    let err = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .err()
        .unwrap();
    match err {
        Error::Load(LoadError::SharedTypeUnresolved { dependency, requirement, .. }) => {
            assert_eq!(dependency, CONTRACT_MODULE);
            assert_eq!(requirement, "^2");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_additional_host_module_is_shared() {
    let fx = Fixture::new();
    let color = TypeDescriptor::new("Widgets.Extras", "Color");
    let manifest = widget_manifest("pluginA", &["Widget"])
        .with_dependency(DependencyRef::new("widgets.extras", req("^1")).with_export(color.clone()));
    let image = ModuleImage::new(manifest).with_factory("pluginA.Widget", |scope| {
        let extras = scope
            .dependency("widgets.extras")
            .map(|d| d.version.to_string())
            .unwrap_or_default();
        Ok(Box::new(TestWidget::named(&extras)))
    });
    fx.install("pluginA", "pluginA.so", image);
    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));

    // Without the host module the dependency is private and absent.
    let err = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, LoadOptions::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Load(LoadError::UnresolvedDependency { .. })));

    let options = LoadOptions::new().configure(move |cx| {
        cx.add_host_module(HostModule::new("widgets.extras", Version::new(1, 1, 0)).with_export(color));
    });
    let widget = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, options)
        .await
        .unwrap();
    assert_eq!(widget.get_name().await.unwrap().text, "1.1.0");
}

#[tokio::test]
async fn test_host_services_reach_bootstrap() {
    let fx = Fixture::new();
    let manifest = widget_manifest("pluginA", &["Widget"]);
    let image = ModuleImage::new(manifest)
        .with_bootstrap(|registry, cx| {
            let tenant = cx
                .host_services
                .get("tenant")
                .and_then(|v| v.as_str())
                .unwrap_or("none")
                .to_string();
            registry.insert("tenant", tenant);
            Ok(())
        })
        .with_factory("pluginA.Widget", |scope| {
            let tenant = scope.require::<String>("tenant")?;
            Ok(Box::new(TestWidget::named(&tenant)))
        });
    fx.install("pluginA", "pluginA.so", image);
    let scan = fx.scan_result("pluginA", "pluginA.so", TypeDescriptor::new("pluginA", "Widget"));

    let options = LoadOptions::new().with_host_services(HostServices::new().with("tenant", "acme"));
    let widget = fx
        .loader()
        .load_plugin::<WidgetContract>(&scan, options)
        .await
        .unwrap();
    assert_eq!(widget.get_name().await.unwrap().text, "acme");
}
