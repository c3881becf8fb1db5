use std::collections::BTreeSet;
use std::io::Write;

use spyglass_config::{
    ConfigError, ConfigFormat, Engine, IntrospectionPolicy, NATIVE_CLUSTER, RefreshRuleKind,
    SourceListScan, load_config, parse_config, render_config,
};

const DOCUMENT: &str = r##"
clusters:
  - name: wiki
    type: druid
    url: http://broker:8082
    sourceListScan: auto
    sourceListRefreshInterval: 15000
    sourceReintrospectOnLoad: true
    auth:
      type: basic-auth
      username: admin
      password: secret
dataCubes:
  - name: edits
    clusterName: wiki
    source: wikipedia
    timeAttribute: __time
    refreshRule:
      rule: realtime
  - name: offline
    clusterName: native
    source: data/offline.json
    introspection: autofill-dimensions-only
    subsetFilter:
      attribute: country
      values: [NZ, AU]
customization:
  title: Spyglass
  headerBackground: "#2D2D2D"
"##;

#[tokio::test]
async fn load_config_reads_and_validates_yaml() -> anyhow::Result<()> {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
    file.write_all(DOCUMENT.as_bytes())?;

    let config = load_config(file.path(), &BTreeSet::new()).await?;
    let cluster = config.cluster("wiki").ok_or_else(|| anyhow::anyhow!("missing cluster"))?;
    assert_eq!(cluster.engine, Engine::Druid);
    assert_eq!(cluster.source_list_scan, SourceListScan::Auto);
    assert_eq!(
        cluster.source_list_refresh().map(|d| d.as_millis()),
        Some(15_000)
    );
    assert!(cluster.source_reintrospect_on_load);

    let edits = config.data_cube("edits").ok_or_else(|| anyhow::anyhow!("missing cube"))?;
    assert_eq!(edits.refresh_rule.rule, RefreshRuleKind::Realtime);

    let natives = config.native_data_cubes();
    assert_eq!(natives.len(), 1);
    assert_eq!(natives[0].cluster_name, NATIVE_CLUSTER);
    assert_eq!(
        natives[0].introspection,
        IntrospectionPolicy::AutofillDimensionsOnly
    );
    assert_eq!(config.customization.title.as_deref(), Some("Spyglass"));
    assert!(config.customization.extra.contains_key("headerBackground"));
    Ok(())
}

#[tokio::test]
async fn load_config_rejects_invalid_documents() -> anyhow::Result<()> {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile()?;
    file.write_all(
        br"
clusters:
  - name: a
    type: mysql
    url: mysql://db
  - name: a
    type: postgres
    url: postgres://db
",
    )?;

    let err = load_config(file.path(), &BTreeSet::new())
        .await
        .expect_err("duplicate names must fail");
    assert!(matches!(err, ConfigError::DuplicateName { .. }));
    Ok(())
}

#[tokio::test]
async fn load_config_reports_missing_file() {
    let err = load_config(
        std::path::Path::new("/nonexistent/spyglass.yaml"),
        &BTreeSet::new(),
    )
    .await
    .expect_err("missing file must fail");
    assert!(matches!(
        err,
        ConfigError::Io {
            operation: "config.read",
            ..
        }
    ));
}

#[test]
fn render_then_parse_preserves_document() -> anyhow::Result<()> {
    let config = parse_config(DOCUMENT, ConfigFormat::Yaml)?;
    let json = render_config(&config, ConfigFormat::Json)?;
    let reparsed = parse_config(&json, ConfigFormat::Json)?;
    assert_eq!(config, reparsed);
    Ok(())
}
