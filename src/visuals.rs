//! Visual feedback as data. The frontend animates these scenes; here we only
//! decide what the scene shows for a given verdict and evaluated value.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualKind {
  QuestScroll,
  ManaCrystal,
  RoyalHeist,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
  Idle,
  Triumph,
  Misfire,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "scene", rename_all = "snake_case")]
pub enum Scene {
  QuestScroll {
    title: &'static str,
    /// Whether the hero walks all the way to the scroll.
    hero_arrives: bool,
    mood: Mood,
    caption: String,
  },
  ManaCrystal {
    title: &'static str,
    charged: bool,
    mood: Mood,
    caption: String,
  },
  RoyalHeist {
    title: &'static str,
    manifest: Vec<String>,
    bag: Vec<String>,
    /// How many manifest items were collected in order before the first mistake.
    collected_in_order: usize,
    mood: Mood,
    caption: String,
  },
}

const HEIST_MANIFEST: [&str; 3] = ["Golden Scepter", "Dragon's Eye Orb", "Sunstone Amulet"];

/// Snapshot of the last evaluation a scene is drawn from.
#[derive(Clone, Copy, Debug)]
pub struct SceneInput<'a> {
  /// `None` before anything was submitted.
  pub passed: Option<bool>,
  pub message: Option<&'a str>,
  pub value: Option<&'a Json>,
}

impl VisualKind {
  pub fn scene(self, input: SceneInput<'_>) -> Scene {
    match self {
      VisualKind::QuestScroll => quest_scroll(input),
      VisualKind::ManaCrystal => mana_crystal(input),
      VisualKind::RoyalHeist => royal_heist(input),
    }
  }
}

fn clip(message: Option<&str>, max: usize) -> String {
  let m = message.unwrap_or_default();
  m.chars().take(max).collect()
}

fn quest_scroll(input: SceneInput<'_>) -> Scene {
  let title = "The Hero's First Errand";
  match (input.passed, input.value) {
    (Some(true), Some(Json::String(q))) if q == "The Lost Artifact" => Scene::QuestScroll {
      title,
      hero_arrives: true,
      mood: Mood::Triumph,
      caption: format!("Quest '{q}' accepted! Onwards!"),
    },
    (Some(false), _) => Scene::QuestScroll {
      title,
      hero_arrives: false,
      mood: Mood::Misfire,
      caption: format!("Hero: \"Hmm, that spell misfired... ({}...)\"", clip(input.message, 50)),
    },
    _ => Scene::QuestScroll {
      title,
      hero_arrives: false,
      mood: Mood::Idle,
      caption: "Hero: \"I need a 'questName' to begin!\"".into(),
    },
  }
}

fn mana_crystal(input: SceneInput<'_>) -> Scene {
  let title = "The Mana Crystal";
  let charged = input.passed == Some(true) && input.value.and_then(Json::as_f64) == Some(100.0);
  if charged {
    return Scene::ManaCrystal {
      title,
      charged,
      mood: Mood::Triumph,
      caption: "Mage: \"The crystal hums with power! Charging...\"".into(),
    };
  }
  match input.passed {
    Some(false) => Scene::ManaCrystal {
      title,
      charged,
      mood: Mood::Misfire,
      caption: format!("Mage: \"The crystal sputters... ({}...)\"", clip(input.message, 60)),
    },
    _ => Scene::ManaCrystal {
      title,
      charged,
      mood: Mood::Idle,
      caption: "Mage: \"This crystal needs maxMana set to 100 to awaken!\"".into(),
    },
  }
}

fn royal_heist(input: SceneInput<'_>) -> Scene {
  let title = "The Royal Heist";
  let manifest: Vec<String> = HEIST_MANIFEST.iter().map(|s| s.to_string()).collect();
  let bag: Vec<String> = match input.value {
    Some(Json::Array(items)) => items.iter().map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())).collect(),
    _ => Vec::new(),
  };
  let collected_in_order = bag.iter().zip(HEIST_MANIFEST.iter()).take_while(|(got, want)| got == *want).count();

  let (mood, caption) = match input.passed {
    Some(true) => (Mood::Triumph, "Heist Successful! All artifacts secured!".to_string()),
    Some(false) => {
      let caption = if bag.len() > collected_in_order {
        let expected = HEIST_MANIFEST.get(collected_in_order).copied().unwrap_or("nothing more");
        format!("Rogue: \"Oops! That's not the {expected} I was looking for next!\"")
      } else {
        match input.message {
          Some(m) if !m.contains("criteria pending") => format!("Oracle: {m}"),
          _ => "Rogue: Something's amiss with the plan...".to_string(),
        }
      };
      (Mood::Misfire, caption)
    }
    None => (Mood::Idle, "Rogue: \"The manifest is set. Fill the heistBag!\"".to_string()),
  };
  Scene::RoyalHeist { title, manifest, bag, collected_in_order, mood, caption }
}
