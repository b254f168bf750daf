//! Instance construction failures surface before any request is served.

use std::sync::Arc;

use stencil::{BuildError, Config, ConfigError, ConfigOption, InitStage, MemorySource};

use crate::common::Journal;

#[test]
fn test_duplicate_provider_fails_before_scan() {
    let journal = Arc::new(Journal::default());
    let result = Config::default().build([
        ConfigOption::templates_dir("/nonexistent/stencil/site"),
        ConfigOption::provider(journal.spec("Audit")),
        ConfigOption::provider(journal.spec("Audit")),
    ]);

    match result {
        Err(BuildError::Configure(ConfigError::DuplicateProvider(name))) => {
            assert_eq!(name, "Audit");
        }
        other => panic!("expected duplicate provider error, got {other:?}"),
    }
    assert!(journal.entries().is_empty());
}

#[test]
fn test_reserved_provider_name_rejected() {
    let journal = Arc::new(Journal::default());
    let result = Config::default().build([
        ConfigOption::source(Arc::new(MemorySource::new())),
        ConfigOption::provider(journal.spec("Req")),
    ]);
    assert!(matches!(
        result,
        Err(BuildError::Configure(ConfigError::ReservedProvider(_)))
    ));
}

#[test]
fn test_missing_directory_is_scan_error() {
    let result =
        Config::default().build([ConfigOption::templates_dir("/nonexistent/stencil/site")]);
    assert!(matches!(result, Err(BuildError::Scan(_))));
}

#[test]
fn test_failing_initializer_names_template() {
    let source = MemorySource::new()
        .with_file("index.html", "ok")
        .with_file("INIT seed.html", "{{ undefined_value.field }}");
    let result = Config::default().build([ConfigOption::source(Arc::new(source))]);

    match result {
        Err(error @ BuildError::Initializer { .. }) => {
            let message = error.to_string();
            assert!(message.contains("INIT seed.html"), "{message}");
            if let BuildError::Initializer { stage, .. } = error {
                assert_eq!(stage, InitStage::Execution);
            }
        }
        other => panic!("expected initializer error, got {other:?}"),
    }
}

#[test]
fn test_initializer_provider_failure_is_dot_init() {
    let journal = Arc::new(Journal::default());
    journal.fail_produce(true);
    let source = MemorySource::new().with_file("index.html", "ok");
    let result = Config::default().build([
        ConfigOption::source(Arc::new(source)),
        ConfigOption::provider(journal.spec("Audit")),
    ]);
    assert!(matches!(result, Err(BuildError::DotInit(_))));
    assert_eq!(journal.entries(), vec!["produce /"]);
}

#[test]
fn test_compile_error_rejects_build() {
    let source = MemorySource::new().with_file("index.html", "{% if %}");
    let result = Config::default().build([ConfigOption::source(Arc::new(source))]);
    assert!(matches!(result, Err(BuildError::Compile(_))));
}
