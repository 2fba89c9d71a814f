//! Config written to disk comes back unchanged.

use peerseek_core::config::PeerseekConfig;
use peerseek_core::{NetworkMode, PeerType};
use peerseek_services::{DomainFilter, ResultFilter, SearchSettings};

#[test]
fn test_config_round_trip() {
    let tmp = std::env::temp_dir().join(format!("peerseek-it-config-{}", std::process::id()));
    std::fs::create_dir_all(&tmp).unwrap();
    let path = tmp.join("config.toml");

    let mut config = PeerseekConfig::default();
    config.identity.name = "crawler-7".into();
    config.identity.peer_type = PeerType::Principal;
    config.identity.tags = vec!["science".into()];
    config.network.mode = NetworkMode::Intranet;
    config.network.bootstrap = vec!["10.0.0.1:8090".into()];
    config.search.redundancy = 2;
    config.search.max_concurrency = 12;
    config.filter.blacklist = vec!["spam.example".into()];
    std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = PeerseekConfig::load_from(&path).unwrap();
    assert_eq!(loaded.identity.name, "crawler-7");
    assert_eq!(loaded.identity.peer_type, PeerType::Principal);
    assert_eq!(loaded.identity.tags, vec!["science"]);
    assert_eq!(loaded.network.mode, NetworkMode::Intranet);
    assert_eq!(loaded.network.bootstrap, vec!["10.0.0.1:8090"]);
    assert_eq!(loaded.registry.seeds_per_hello, config.registry.seeds_per_hello);

    // the loaded sections drive the services directly
    let settings = SearchSettings::from(&loaded.search);
    assert_eq!(settings.redundancy, 2);
    assert_eq!(settings.max_concurrency, 12);
    let filter = DomainFilter::from_config(&loaded.filter);
    assert!(!filter.is_accepted("http://www.spam.example/"));
    assert!(filter.is_accepted("http://example.org/"));

    let _ = std::fs::remove_dir_all(&tmp);
}
