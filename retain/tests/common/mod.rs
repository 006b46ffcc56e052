#![allow(dead_code)]

use std::sync::{Arc, Once};

use retain::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %Z".into()))
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumValue)]
pub enum Tier {
    Recruit,
    Veteran = 5,
    Elite = 9,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
    pub color: String,
    pub sigil: u8,
}

#[derive(Debug, Host)]
#[host(tag = "Hero")]
pub struct HeroObject {
    pub id: String,
    #[slot]
    pub gold: i32,
    #[slot]
    pub name: String,
    #[slot]
    pub morale: f64,
    #[slot]
    pub tier: Tier,
    #[slot]
    pub alive: bool,
    pub renown: i64,
}

#[derive(Debug, Host)]
#[host(tag = "Party")]
pub struct PartyObject {
    #[host(id)]
    pub string_id: String,
    #[slot(name = "size")]
    pub troops: u32,
}

pub struct Hero;

pub struct Party;

/// Shares the hero host type but declares nothing, so the eager pass falls
/// back to host slots and the local store.
pub struct Scout;

impl Model for Hero {
    const TYPE_TAG: &'static str = "Hero";

    type Host = HeroObject;

    fn declare(schema: &mut SchemaBuilder<HeroObject>) {
        schema.slot::<i32>("gold").priority(Priority::HIGH);
        schema.slot::<String>("name");
        schema.slot::<f64>("morale");
        schema.slot::<Tier>("tier");
        schema.slot::<bool>("alive");
        schema.delegate::<i64>("renown", |hero| hero.renown, |hero, value| hero.renown = value);
        schema.local::<i32>("xp", 0);
        schema.local::<i32>("wage", 10).depends_on(["gold", "tier"]);
        schema
            .local::<Text>("biography", Text::default())
            .priority(Priority::LOW);
        schema.local::<Json<Banner>>(
            "banner",
            Json(Banner {
                color: "grey".to_owned(),
                sigil: 0,
            }),
        );
        schema.local::<Option<Ref<Hero>>>("rival", None);
        schema.local::<Vec<Ref<Party>>>("parties", Vec::new());
        schema.local::<i32>("scratch", 0).persistent(false);
        schema.local::<i32>("cache", 0).serializable(false);
    }
}

impl Model for Party {
    const TYPE_TAG: &'static str = "Party";

    type Host = PartyObject;

    fn declare(schema: &mut SchemaBuilder<PartyObject>) {
        schema.slot::<u32>("size");
        schema.local::<Option<Ref<Hero>>>("leader", None);
    }
}

impl Model for Scout {
    const TYPE_TAG: &'static str = "Scout";

    type Host = HeroObject;

    fn declare(_: &mut SchemaBuilder<HeroObject>) {}
}

pub fn hero(id: &str) -> HeroObject {
    HeroObject {
        id: id.to_owned(),
        gold: 0,
        name: String::new(),
        morale: 1.0,
        tier: Tier::Recruit,
        alive: true,
        renown: 0,
    }
}

pub fn party(id: &str, troops: u32) -> PartyObject {
    PartyObject {
        string_id: id.to_owned(),
        troops,
    }
}

pub fn session(directory: &Arc<MemoryDirectory>) -> Session {
    init_tracing();

    Session::builder(directory.clone())
        .model::<Hero>()
        .unwrap()
        .model::<Party>()
        .unwrap()
        .model::<Scout>()
        .unwrap()
        .build()
}

/// Fresh directory and session holding the given heroes.
pub fn world(ids: &[&str]) -> (Arc<MemoryDirectory>, Session) {
    let directory = Arc::new(MemoryDirectory::new());
    for id in ids {
        directory.insert(hero(id));
    }
    let session = session(&directory);

    (directory, session)
}
