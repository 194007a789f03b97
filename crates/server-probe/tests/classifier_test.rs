//! Classification scenarios over full probe metadata

use server_probe::{Gamemode, RawTags, ServerMetadata, classify_metadata};
use std::collections::HashMap;

fn metadata(name: &str, map: &str, tags: RawTags) -> ServerMetadata {
    ServerMetadata {
        name: name.to_string(),
        map: map.to_string(),
        raw_tags: tags,
        ..Default::default()
    }
}

#[test]
fn test_reference_scenarios() {
    assert_eq!(
        classify_metadata(&metadata("Kitsune", "surf_kitsune", RawTags::default())),
        Gamemode::Surf
    );
    assert_eq!(
        classify_metadata(&metadata("Best AWP 1v1 Server", "aim_arena", RawTags::default())),
        Gamemode::Awp
    );
    assert_eq!(
        classify_metadata(&metadata("casual pub", "de_dust2", RawTags::default())),
        Gamemode::Public
    );
}

#[test]
fn test_list_and_delimited_tags_classify_identically() {
    let as_list = metadata(
        "Community",
        "de_overpass",
        RawTags::List(vec!["Secure".into(), "Retakes".into()]),
    );
    let as_string = metadata("Community", "de_overpass", RawTags::Delimited("secure, retakes".into()));

    assert_eq!(classify_metadata(&as_list), Gamemode::Retake);
    assert_eq!(classify_metadata(&as_list), classify_metadata(&as_string));
}

#[test]
fn test_rules_contribute_tags() {
    let mut meta = metadata("Community", "de_cache", RawTags::default());
    let mut rules = HashMap::new();
    rules.insert("jailbreak".to_string(), "1".to_string());
    meta.raw_rules = rules;

    assert_eq!(classify_metadata(&meta), Gamemode::Jailbreak);
}

#[test]
fn test_priority_order_is_respected() {
    // zombie name beats a deathmatch tag
    let meta = metadata("Zombie Escape EU", "de_dust2", RawTags::Delimited("ffa".into()));
    assert_eq!(classify_metadata(&meta), Gamemode::ZombieEscape);

    // deathmatch beats aim
    let meta = metadata("FFA Deathmatch", "aim_map", RawTags::default());
    assert_eq!(classify_metadata(&meta), Gamemode::Deathmatch);
}
