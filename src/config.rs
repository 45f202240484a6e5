use anyhow::{Context, Result};
use ethers::types::{Address, U256};

use crate::models::{CollectionKind, Goal, GoalRule};

/// Pet item collection (ERC-1155) on the game chain.
pub const PET_CONTRACT: &str = "0x40da2B4a5feB3ABD0FF7fD12C158C0ddbF6391e0";
/// Armor item collection.
pub const ARMOR_CONTRACT: &str = "0x9E7ADF51b3517355A0b5F6541D1FB089F3aDbA40";
/// Weapon item collection.
pub const WEAPON_CONTRACT: &str = "0x5727d991BC6D46Ab8163d468Bd49Ab4A427B5798";

pub const PET_TOKEN_COUNT: u64 = 16;
pub const ARMOR_TOKEN_COUNT: u64 = 12;
pub const WEAPON_TOKEN_COUNT: u64 = 12;

// Token ids of the single rare/epic/legendary drop in each equipment
// collection. These track the deployed metadata; update alongside the
// contracts if the catalogue is re-minted.
const RARE_ARMOR_ID: u64 = 2;
const EPIC_ARMOR_ID: u64 = 5;
const LEGENDARY_ARMOR_ID: u64 = 9;
const RARE_WEAPON_ID: u64 = 2;
const EPIC_WEAPON_ID: u64 = 5;
const LEGENDARY_WEAPON_ID: u64 = 9;

/// One tracked collection: its contract address plus the size of its
/// token-id space (`0..token_count`), which bounds the balance sweep and the
/// goal-table validation.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub kind: CollectionKind,
    pub address: Address,
    pub token_count: u64,
}

/// The fixed collection catalogue for a run.
pub fn catalogue() -> Result<Vec<CollectionConfig>> {
    let parse = |kind: CollectionKind, raw: &str, token_count: u64| -> Result<CollectionConfig> {
        let address = raw
            .parse::<Address>()
            .with_context(|| format!("invalid {kind} contract address `{raw}`"))?;
        Ok(CollectionConfig {
            kind,
            address,
            token_count,
        })
    };

    Ok(vec![
        parse(CollectionKind::Pets, PET_CONTRACT, PET_TOKEN_COUNT)?,
        parse(CollectionKind::Armor, ARMOR_CONTRACT, ARMOR_TOKEN_COUNT)?,
        parse(CollectionKind::Weapons, WEAPON_CONTRACT, WEAPON_TOKEN_COUNT)?,
    ])
}

/// The static goal table. Evaluated once per run against the finalized
/// snapshots; order here fixes the report numbering.
pub fn goals() -> Vec<Goal> {
    let specific = |collection: CollectionKind, id: u64| GoalRule::OwnsSpecificToken {
        collection,
        token_id: U256::from(id),
    };
    let distinct = |collection: CollectionKind, count: usize| GoalRule::OwnsAtLeastDistinct {
        collection,
        count,
    };

    vec![
        Goal {
            seq: 1,
            id: "owns_rare_armor",
            rule: specific(CollectionKind::Armor, RARE_ARMOR_ID),
        },
        Goal {
            seq: 2,
            id: "owns_rare_weapon",
            rule: specific(CollectionKind::Weapons, RARE_WEAPON_ID),
        },
        Goal {
            seq: 3,
            id: "owns_epic_armor",
            rule: specific(CollectionKind::Armor, EPIC_ARMOR_ID),
        },
        Goal {
            seq: 4,
            id: "owns_epic_weapon",
            rule: specific(CollectionKind::Weapons, EPIC_WEAPON_ID),
        },
        Goal {
            seq: 5,
            id: "owns_legendary_armor",
            rule: specific(CollectionKind::Armor, LEGENDARY_ARMOR_ID),
        },
        Goal {
            seq: 6,
            id: "owns_legendary_weapon",
            rule: specific(CollectionKind::Weapons, LEGENDARY_WEAPON_ID),
        },
        Goal {
            seq: 7,
            id: "owns_1_pet",
            rule: distinct(CollectionKind::Pets, 1),
        },
        Goal {
            seq: 8,
            id: "owns_5_pets",
            rule: distinct(CollectionKind::Pets, 5),
        },
        Goal {
            seq: 9,
            id: "owns_10_pets",
            rule: distinct(CollectionKind::Pets, 10),
        },
        Goal {
            seq: 10,
            id: "owns_15_pets",
            rule: distinct(CollectionKind::Pets, 15),
        },
    ]
}
