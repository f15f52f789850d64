/// Failures degrade metrics, never the run
#[cfg(test)]
mod tests {
    use buildlineage::aggregate::calculate_totals;
    use buildlineage::error::{LineageError, Result};
    use buildlineage::graph::BuildTree;
    use buildlineage::record::BuildFact;
    use buildlineage::registry::{
        HttpLayerSource, LayerInfo, LayerSizes, LayerSource, SizeOracle, SizeResolver,
    };
    use serde_json::json;

    struct Unavailable;

    impl LayerSource for Unavailable {
        fn layer(&self, image: &str, layer_id: &str) -> Result<LayerInfo> {
            Err(LineageError::Status {
                url: format!("stub://{}/{}/json", image, layer_id),
                status: 503,
            })
        }

        fn list_layers(&self, image: &str) -> Result<Vec<String>> {
            Err(LineageError::Status {
                url: format!("stub://{}", image),
                status: 503,
            })
        }
    }

    #[test]
    fn test_unreachable_registry_yields_zero_sizes() {
        // Port 9 (discard) is closed on test hosts, so the connect fails fast
        let mut resolver = SizeResolver::from_registry_url(Some("http://127.0.0.1:9"));
        let records = vec![json!({
            "metadata": {
                "name": "b1",
                "annotations": {
                    "base-image-name": "rhel7:7.2",
                    "repositories": "{\"primary\": [\"app:1\"], \"unique\": [\"app:1-b1\"]}",
                    "image-id": "abc",
                    "tar_metadata": "{\"size\": 1000}"
                }
            },
            "status": {"startTimestamp": "2016-03-01T10:00:00Z", "duration": 5000000000u64}
        })];

        let tree = BuildTree::from_records(&records, &mut resolver);
        assert_eq!(tree.edge_count(), 1);

        let m = tree.metrics_for("app:1").unwrap();
        assert_eq!(m.upload_size, 0);
        assert_eq!(m.layer_size, 0);
        assert_eq!(m.duration_secs, 5.0);
        assert_eq!(calculate_totals(&tree).upload_size, 0);
    }

    #[test]
    fn test_multibyte_image_id_under_debug_logging() {
        // 'é' straddles byte 12, where lookup logging shortens ids
        let fact = BuildFact {
            name: Some("b1".to_string()),
            phase: Some("Complete".to_string()),
            base_image: "rhel7:7.2".to_string(),
            produced_tags: vec!["app:1".to_string()],
            when: "2016-03-01T10:00:00Z".parse().unwrap(),
            duration_secs: 1.0,
            image_id: "abcdefghijké-suffix".to_string(),
            lookup_image: "app:1".to_string(),
            size_hint: None,
            plugin_durations: Default::default(),
        };
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();

        let mut resolver = SizeResolver::new(Box::new(Unavailable));
        let sizes = tracing::subscriber::with_default(subscriber, || resolver.resolve(&fact));
        assert_eq!(sizes, LayerSizes::default());
    }

    #[test]
    fn test_http_source_reports_transport_error() {
        let source = HttpLayerSource::new("http://127.0.0.1:9/");
        let err = source.layer("app", "abc").unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("redhat-app/abc/json"));
    }

    #[test]
    fn test_listing_url_has_no_trailing_slash() {
        let source = HttpLayerSource::new("http://127.0.0.1:9");
        let err = source.list_layers("rhel7/foo").unwrap_err();
        assert!(err.is_transport());
        assert!(err
            .to_string()
            .contains("http://127.0.0.1:9/pulp/docker/v1/redhat-rhel7-foo: "));
    }

    #[test]
    fn test_error_conversion() {
        let err = LineageError::NoMatchingLayer {
            repo: "rhel7/foo".to_string(),
            expected: "rhel7/foo:1.0-3".to_string(),
        };
        let anyhow_err: anyhow::Error = err.into();
        assert!(anyhow_err.to_string().contains("rhel7/foo:1.0-3"));
    }

    #[test]
    fn test_malformed_layer_display() {
        let err = LineageError::MalformedLayer {
            layer_id: "abc123".to_string(),
            reason: "missing Size".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("missing Size"));
    }
}
