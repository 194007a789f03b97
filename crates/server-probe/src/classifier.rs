//! Gamemode classification.
//!
//! Rules are evaluated in order and the first match wins, so more specific
//! modes must precede the broader ones they overlap with (`awp` before `aim`).

use crate::tags::TagSet;
use crate::types::{Gamemode, ServerMetadata};

struct Rule {
    gamemode: Gamemode,
    map_prefixes: &'static [&'static str],
    name_contains: &'static [&'static str],
    tags: &'static [&'static str],
}

const RULES: &[Rule] = &[
    Rule {
        gamemode: Gamemode::Surf,
        map_prefixes: &["surf_"],
        name_contains: &["surf"],
        tags: &["surf"],
    },
    Rule {
        gamemode: Gamemode::Bhop,
        map_prefixes: &["bhop_"],
        name_contains: &["bhop", "bunnyhop"],
        tags: &["bhop", "bunnyhop"],
    },
    Rule {
        gamemode: Gamemode::ZombieEscape,
        map_prefixes: &["ze_", "zm_"],
        name_contains: &["zombie"],
        tags: &["ze", "zombie", "zombieescape"],
    },
    Rule {
        gamemode: Gamemode::Kz,
        map_prefixes: &["kz_", "kzpro_", "bkz_", "xc_", "climb_"],
        name_contains: &["kz", "climb"],
        tags: &["kz", "kreedz", "climb"],
    },
    Rule {
        gamemode: Gamemode::Deathmatch,
        map_prefixes: &[],
        name_contains: &["deathmatch", "ffa"],
        tags: &["deathmatch", "dm", "ffa"],
    },
    Rule {
        gamemode: Gamemode::Retake,
        map_prefixes: &[],
        name_contains: &["retake"],
        tags: &["retake", "retakes"],
    },
    Rule {
        gamemode: Gamemode::Awp,
        map_prefixes: &["awp_"],
        name_contains: &["awp"],
        tags: &["awp"],
    },
    Rule {
        gamemode: Gamemode::Aim,
        map_prefixes: &["aim_"],
        name_contains: &["1v1", "aim"],
        tags: &["aim", "1v1", "arena"],
    },
    Rule {
        gamemode: Gamemode::Jailbreak,
        map_prefixes: &["jb_", "ba_jail"],
        name_contains: &["jail"],
        tags: &["jailbreak", "jail"],
    },
    Rule {
        gamemode: Gamemode::Gungame,
        map_prefixes: &["gg_"],
        name_contains: &["gungame", "gun game", "arms race"],
        tags: &["gungame", "armsrace"],
    },
    Rule {
        gamemode: Gamemode::CombatSurf,
        map_prefixes: &[],
        name_contains: &["combat surf"],
        tags: &["combatsurf", "combat-surf"],
    },
    Rule {
        gamemode: Gamemode::Minigame,
        map_prefixes: &["mg_"],
        name_contains: &["minigame", "multigame"],
        tags: &["minigame", "minigames", "mg"],
    },
    Rule {
        gamemode: Gamemode::HideAndSeek,
        map_prefixes: &["hns_"],
        name_contains: &["hide and seek", "hns"],
        tags: &["hns", "hideandseek"],
    },
];

impl Rule {
    fn matches(&self, name: &str, map: &str, tags: &TagSet) -> bool {
        self.map_prefixes.iter().any(|p| map.starts_with(p))
            || self.name_contains.iter().any(|s| name.contains(s))
            || self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Classify a server from its name, map and normalized tags.
pub fn classify(name: &str, map: &str, tags: &TagSet) -> Gamemode {
    let name = name.to_lowercase();
    let map = map.to_lowercase();

    RULES
        .iter()
        .find(|rule| rule.matches(&name, &map, tags))
        .map(|rule| rule.gamemode)
        .unwrap_or(Gamemode::Public)
}

/// Classify probed metadata, normalizing its tags and rules first.
pub fn classify_metadata(metadata: &ServerMetadata) -> Gamemode {
    let tags = TagSet::from_raw_with_rules(&metadata.raw_tags, &metadata.raw_rules);
    classify(&metadata.name, &metadata.map, &tags)
}
