//! 降级编排端到端场景（脚本化传输，无网络）

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use datahive::cache::{CacheEntry, CacheKey};
    use datahive::catalog::{Catalog, Category, ResourceDescriptor};
    use datahive::config::{AppConfig, ProxyEntry};
    use datahive::core::{ErrorClass, FetchFailure};
    use datahive::health::HealthStatus;
    use datahive::transport::{ScriptedResponse, ScriptedTransport, TransportError};
    use datahive::{Orchestrator, OrchestratorBuilder, RequestSpec};
    use tokio_util::sync::CancellationToken;

    fn build_with(
        config: AppConfig,
        resources: Vec<ResourceDescriptor>,
        transport: Arc<ScriptedTransport>,
    ) -> Orchestrator {
        OrchestratorBuilder::new(config)
            .with_catalog(Catalog::new(resources).unwrap())
            .with_transport(transport)
            .build()
            .unwrap()
    }

    fn build(
        resources: Vec<ResourceDescriptor>,
        transport: Arc<ScriptedTransport>,
    ) -> Orchestrator {
        let mut config = AppConfig::default();
        config.proxy.resolvers.clear();
        build_with(config, resources, transport)
    }

    fn resource(id: &str, category: Category, priority: u32) -> ResourceDescriptor {
        ResourceDescriptor::new(id, category, format!("https://{}.test", id))
            .with_priority(priority)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success_on_next_resource() {
        let t = Arc::new(ScriptedTransport::new());
        t.on(
            "https://a.test",
            vec![ScriptedResponse::delayed(Duration::from_secs(30), ScriptedResponse::ok("{}"))],
        );
        t.on(
            "https://b.test",
            vec![ScriptedResponse::delayed(
                Duration::from_millis(120),
                ScriptedResponse::ok(r#"{"price":42000}"#),
            )],
        );
        t.on("https://c.test", vec![ScriptedResponse::ok("{}")]);
        let o = build(
            vec![
                resource("a", Category::MarketData, 1),
                resource("b", Category::MarketData, 2),
                resource("c", Category::MarketData, 3),
            ],
            t.clone(),
        );

        let out = o.execute(Category::MarketData, &RequestSpec::get("/price"), None).await;

        assert!(out.success && !out.stale);
        assert_eq!(out.source_id.as_deref(), Some("b"));
        assert_eq!(out.payload.unwrap()["price"], 42000);
        let summary: Vec<(&str, bool)> = out
            .attempts
            .iter()
            .map(|a| (a.resource_id.as_str(), a.success))
            .collect();
        assert_eq!(summary, vec![("a", false), ("b", true)]);
        assert_eq!(out.attempts[0].error_class, Some(ErrorClass::Timeout));
        assert_eq!(out.attempts[1].latency_ms, 120);
        assert_eq!(t.call_count("https://c.test"), 0);

        let health = &o.context().health;
        assert_eq!(health.health("a").unwrap().consecutive_failures, 1);
        assert_eq!(health.health("b").unwrap().avg_latency_ms, Some(120.0));
    }

    #[tokio::test]
    async fn test_geo_blocked_everywhere_marks_proxy_needed() {
        let t = Arc::new(ScriptedTransport::new());
        t.on("https://", vec![ScriptedResponse::geo_blocked()]);
        let o = build(
            vec![
                resource("a", Category::MarketData, 1),
                resource("b", Category::MarketData, 2),
                resource("c", Category::MarketData, 3),
            ],
            t,
        );

        let out = o.execute(Category::MarketData, &RequestSpec::get("/ticker"), None).await;

        assert!(!out.success);
        assert_eq!(out.failure, Some(FetchFailure::AllAttemptsFailed));
        assert_eq!(out.attempts.len(), 3);
        assert!(out
            .attempts
            .iter()
            .all(|a| a.error_class == Some(ErrorClass::GeoBlock)));
        for id in ["a", "b", "c"] {
            assert_eq!(o.context().health.status(id), HealthStatus::ProxyNeeded);
        }

        // 无代理可用时，后续调用每个资源都记为 ProxyExhausted，仍不会中断降级链
        let again = o.execute(Category::MarketData, &RequestSpec::get("/ticker"), None).await;
        assert_eq!(again.attempts.len(), 3);
        assert!(again
            .attempts
            .iter()
            .all(|a| a.error_class == Some(ErrorClass::ProxyExhausted) && a.via_proxy));
    }

    #[tokio::test]
    async fn test_repeated_failures_lead_to_blocked_and_exclusion() {
        let t = Arc::new(ScriptedTransport::new());
        t.on("https://a.test", vec![ScriptedResponse::status(503, "unavailable")]);
        let o = build(vec![resource("a", Category::News, 1)], t);
        let spec = RequestSpec::get("/latest");

        for _ in 0..4 {
            o.execute(Category::News, &spec, None).await;
        }
        assert_eq!(o.context().health.status("a"), HealthStatus::Degraded);
        o.execute(Category::News, &spec, None).await;
        assert_eq!(o.context().health.status("a"), HealthStatus::Failed);
        assert_eq!(o.select_order(Category::News), vec!["a".to_string()]);

        // 宽限期内巡检不排除
        assert!(o.cleanup_failed().is_empty());

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(o.context().health.cleanup_pass_at(later), vec!["a".to_string()]);
        assert_eq!(o.context().health.status("a"), HealthStatus::Blocked);
        assert!(o.select_order(Category::News).is_empty());

        let out = o.execute(Category::News, &spec, None).await;
        assert_eq!(out.failure, Some(FetchFailure::NoResourcesAvailable));
        assert!(out.attempts.is_empty());

        assert!(o.reset_resource("a"));
        assert_eq!(o.select_order(Category::News), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_served_as_stale() {
        let t = Arc::new(ScriptedTransport::new());
        t.on(
            "https://",
            vec![ScriptedResponse::Fail(TransportError::Connection("refused".into()))],
        );
        let o = build(
            vec![resource("a", Category::News, 1), resource("b", Category::News, 2)],
            t,
        );
        let spec = RequestSpec::get("/latest").with_query("limit", "5");
        let written_at = Utc::now() - chrono::Duration::seconds(310);
        o.context().cache.set(
            CacheEntry::new(
                CacheKey::new(Category::News, spec.cache_key()),
                serde_json::json!({"items": ["t0"]}),
                "a",
                Duration::from_secs(300),
            )
            .fetched_at(written_at),
        )
        .await;

        let out = o.execute(Category::News, &spec, None).await;

        assert!(out.success);
        assert!(out.stale);
        assert_eq!(out.payload.unwrap()["items"][0], "t0");
        assert_eq!(out.fetched_at, Some(written_at));
        assert_eq!(out.attempts.len(), 2);
        assert_eq!(o.get_stats()[&Category::News].stale_served, 1);
    }

    #[tokio::test]
    async fn test_fresh_success_then_stale_fallback() {
        let t = Arc::new(ScriptedTransport::new());
        t.on(
            "https://a.test",
            vec![
                ScriptedResponse::ok(r#"{"fng":71}"#),
                ScriptedResponse::status(500, ""),
            ],
        );
        let o = build(vec![resource("a", Category::Sentiment, 1)], t);
        let spec = RequestSpec::get("/fng/");

        let first = o.execute(Category::Sentiment, &spec, None).await;
        assert!(first.success && !first.stale);

        let second = o.execute(Category::Sentiment, &spec, None).await;
        assert!(second.success && second.stale);
        assert_eq!(second.payload, first.payload);
        assert_eq!(second.source_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_max_attempts_bounds_tied_resources() {
        let t = Arc::new(ScriptedTransport::new());
        t.on("https://", vec![ScriptedResponse::status(502, "")]);
        let resources = (0..10)
            .map(|i| {
                let id = format!("r{:02}", i);
                let url = format!("https://{}.test", id);
                ResourceDescriptor::new(id, Category::Rpc, url)
            })
            .collect();
        let o = build(resources, t.clone());

        let out = o.execute(Category::Rpc, &RequestSpec::post("", "{}"), Some(2)).await;

        assert!(!out.success);
        assert_eq!(out.attempted_ids(), vec!["r00", "r01"]);
        assert_eq!(t.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_default_max_attempts_is_capped() {
        let t = Arc::new(ScriptedTransport::new());
        t.on("https://", vec![ScriptedResponse::status(502, "")]);
        let resources = (0..20)
            .map(|i| {
                let id = format!("r{:02}", i);
                let url = format!("https://{}.test", id);
                ResourceDescriptor::new(id, Category::Rpc, url)
            })
            .collect();
        let o = build(resources, t);

        let out = o.execute(Category::Rpc, &RequestSpec::post("", "{}"), None).await;
        assert_eq!(out.attempts.len(), 15);
    }

    #[tokio::test]
    async fn test_select_order_is_stable_without_new_attempts() {
        let t = Arc::new(ScriptedTransport::new());
        t.on("https://b.test", vec![ScriptedResponse::status(500, "")]);
        t.on("https://", vec![ScriptedResponse::ok("{}")]);
        let o = build(
            vec![
                resource("a", Category::OnChain, 5),
                resource("b", Category::OnChain, 1),
                resource("c", Category::OnChain, 5),
            ],
            t,
        );
        o.execute(Category::OnChain, &RequestSpec::get("/stats"), None).await;

        let first = o.select_order(Category::OnChain);
        for _ in 0..20 {
            assert_eq!(o.select_order(Category::OnChain), first);
        }
        // b 失败过一次，排在未尝试过的 a、c 之后
        assert_eq!(first.last().map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn test_requires_proxy_rotates_past_dead_proxy() {
        let t = Arc::new(ScriptedTransport::new());
        t.on_via_proxy(
            "http://dead:8080",
            "https://binance.test",
            vec![ScriptedResponse::Fail(TransportError::Connection("refused".into()))],
        );
        t.on_via_proxy(
            "http://alive:8080",
            "https://binance.test",
            vec![ScriptedResponse::ok("[]")],
        );

        let mut config = AppConfig::default();
        config.proxy.resolvers.clear();
        for url in ["http://dead:8080", "http://alive:8080"] {
            config.proxy.proxies.push(ProxyEntry {
                url: url.into(),
                username: None,
                password: None,
            });
        }
        let o = build_with(
            config,
            vec![resource("binance", Category::MarketData, 1).with_proxy(true)],
            t.clone(),
        );

        let out = o.execute(Category::MarketData, &RequestSpec::get("/ticker/price"), None).await;

        assert!(out.success);
        assert!(out.attempts[0].via_proxy);
        let calls = t.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.proxy.is_some()));
        let report = o.proxy_report();
        assert_eq!(report[0].failures, 1);
        assert_eq!(report[1].successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_attempts_so_far() {
        let t = Arc::new(ScriptedTransport::new());
        t.on("https://a.test", vec![ScriptedResponse::status(500, "")]);
        t.on(
            "https://b.test",
            vec![ScriptedResponse::delayed(Duration::from_secs(8), ScriptedResponse::ok("{}"))],
        );
        let o = Arc::new(build(
            vec![
                resource("a", Category::BlockExplorer, 1),
                resource("b", Category::BlockExplorer, 2),
                resource("c", Category::BlockExplorer, 3),
            ],
            t.clone(),
        ));
        let token = CancellationToken::new();

        let task = {
            let o = o.clone();
            let token = token.clone();
            tokio::spawn(async move {
                o.execute_with_cancel(Category::BlockExplorer, &RequestSpec::get(""), None, &token)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
        let out = task.await.unwrap();

        assert!(out.cancelled);
        assert_eq!(out.attempted_ids(), vec!["a"]);
        assert_eq!(t.call_count("https://c.test"), 0);
        assert!(o.context().health.health("b").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_categories_progress_independently() {
        let t = Arc::new(ScriptedTransport::new());
        t.on("https://", vec![ScriptedResponse::ok(r#"{"ok":true}"#)]);
        let o = build(
            Category::ALL
                .iter()
                .enumerate()
                .map(|(i, c)| resource(&format!("src{}", i), *c, 1))
                .collect(),
            t,
        );

        let spec = RequestSpec::get("/");
        let outcomes = futures_util::future::join_all(
            Category::ALL
                .iter()
                .map(|c| o.execute(*c, &spec, None)),
        )
        .await;

        assert!(outcomes.iter().all(|out| out.success && out.attempts.len() == 1));
        let stats = o.get_stats();
        assert!(Category::ALL.iter().all(|c| stats[c].successes == 1));

        let report = o.get_health_report();
        assert_eq!(report.categories.len(), Category::ALL.len());
        assert!(report.resources.iter().all(|r| r.status == HealthStatus::Active));
    }
}
