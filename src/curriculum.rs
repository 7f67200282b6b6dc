//! Curriculum store: the immutable MainTopic → SubTopic → Concept tree,
//! loaded from TOML content, plus an index for O(1) ancestry lookups.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::criteria::{CriteriaSpec, Pending};
use crate::domain::{Challenge, Concept, Difficulty, MainTopic, SubTopic};
use crate::visuals::VisualKind;

const BUILTIN_CURRICULUM: &str = include_str!("../content/curriculum.toml");

#[derive(Debug, Error)]
pub enum CurriculumError {
  #[error("failed to read curriculum {path}: {source}")]
  Io { path: String, source: std::io::Error },
  #[error("invalid curriculum content: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("challenge id '{0}' appears more than once")]
  DuplicateChallenge(String),
  #[error("intro topic '{0}' is not a main topic of this curriculum")]
  UnknownIntroTopic(String),
}

/// Where a concept sits in curriculum order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
  pub main: usize,
  pub sub: usize,
  pub concept: usize,
}

#[derive(Debug)]
pub struct Curriculum {
  pub id: String,
  pub name: String,
  main_topics: Vec<MainTopic>,
  intro_topic: Option<String>,
  by_challenge: HashMap<String, Position>,
  by_concept: HashMap<String, Position>,
}

pub fn default_description(topic: &str) -> String {
  format!("Unravel the mysteries of {topic}. Prove your understanding by weaving the correct spell.")
}

pub fn default_starter_code(topic: &str) -> String {
  format!("// The Altar of {topic} awaits your inscription...\n")
}

impl Curriculum {
  /// The JavaScript Mastery Path shipped with the binary.
  pub fn builtin() -> Result<Self, CurriculumError> {
    Self::from_toml_str(BUILTIN_CURRICULUM)
  }

  /// Load from `path` when given, otherwise the built-in content.
  #[instrument(level = "info", target = "curriculum")]
  pub fn load(path: Option<&Path>) -> Result<Self, CurriculumError> {
    let curriculum = match path {
      Some(p) => {
        let text = std::fs::read_to_string(p)
          .map_err(|source| CurriculumError::Io { path: p.display().to_string(), source })?;
        Self::from_toml_str(&text)?
      }
      None => Self::builtin()?,
    };
    info!(
      target: "curriculum",
      id = %curriculum.id,
      main_topics = curriculum.main_topics.len(),
      challenges = curriculum.by_challenge.len(),
      "curriculum loaded"
    );
    Ok(curriculum)
  }

  pub fn from_toml_str(text: &str) -> Result<Self, CurriculumError> {
    let doc: CurriculumDoc = toml::from_str(text)?;
    let main_topics = doc.main_topics.into_iter().map(MainTopicDoc::build).collect();
    Self::from_parts(doc.id, doc.name, doc.intro_topic, main_topics)
  }

  /// Assemble a curriculum: fill empty subtopics with a placeholder and build the index.
  pub fn from_parts(
    id: impl Into<String>,
    name: impl Into<String>,
    intro_topic: Option<String>,
    mut main_topics: Vec<MainTopic>,
  ) -> Result<Self, CurriculumError> {
    for mt in &mut main_topics {
      let (mt_id, mt_name) = (mt.id.clone(), mt.name.clone());
      for st in mt.sub_topics.iter_mut().filter(|st| st.concepts.is_empty()) {
        st.concepts.push(placeholder_concept(&mt_id, &mt_name, st));
      }
    }

    let intro_topic = match intro_topic {
      Some(id) if main_topics.iter().any(|mt| mt.id == id) => Some(id),
      Some(id) => return Err(CurriculumError::UnknownIntroTopic(id)),
      None => main_topics.first().map(|mt| mt.id.clone()),
    };

    let mut by_challenge = HashMap::new();
    let mut by_concept = HashMap::new();
    for (mi, mt) in main_topics.iter().enumerate() {
      for (si, st) in mt.sub_topics.iter().enumerate() {
        for (ci, c) in st.concepts.iter().enumerate() {
          let pos = Position { main: mi, sub: si, concept: ci };
          if by_challenge.insert(c.challenge.id.clone(), pos).is_some() {
            return Err(CurriculumError::DuplicateChallenge(c.challenge.id.clone()));
          }
          by_concept.entry(c.id.clone()).or_insert(pos);
        }
      }
    }

    Ok(Self { id: id.into(), name: name.into(), main_topics, intro_topic, by_challenge, by_concept })
  }

  pub fn main_topics(&self) -> &[MainTopic] {
    &self.main_topics
  }

  pub fn is_empty(&self) -> bool {
    self.by_challenge.is_empty()
  }

  /// The introductory unit: unlocked and pre-completed for every new learner.
  pub fn intro_topic_id(&self) -> Option<&str> {
    self.intro_topic.as_deref()
  }

  pub fn position(&self, challenge_id: &str) -> Option<Position> {
    self.by_challenge.get(challenge_id).copied()
  }

  pub fn concept_at(&self, pos: Position) -> Option<&Concept> {
    self.main_topics.get(pos.main)?.sub_topics.get(pos.sub)?.concepts.get(pos.concept)
  }

  pub fn find_challenge(&self, id: &str) -> Option<&Challenge> {
    self.position(id).and_then(|p| self.concept_at(p)).map(|c| &c.challenge)
  }

  /// Accepts either a concept id or its challenge id.
  pub fn find_concept(&self, id: &str) -> Option<&Concept> {
    self.by_concept.get(id).or_else(|| self.by_challenge.get(id)).and_then(|p| self.concept_at(*p))
  }

  pub fn parent_sub_topic(&self, challenge_id: &str) -> Option<&SubTopic> {
    let p = self.position(challenge_id)?;
    self.main_topics.get(p.main)?.sub_topics.get(p.sub)
  }

  pub fn parent_main_topic(&self, challenge_id: &str) -> Option<&MainTopic> {
    let p = self.position(challenge_id)?;
    self.main_topics.get(p.main)
  }

  /// Every concept with its ancestors, in curriculum order.
  pub fn walk(&self) -> impl Iterator<Item = (&MainTopic, &SubTopic, &Concept)> + '_ {
    self.main_topics.iter().flat_map(|mt| {
      mt.sub_topics.iter().flat_map(move |st| st.concepts.iter().map(move |c| (mt, st, c)))
    })
  }

  /// All challenges in curriculum order.
  pub fn all_challenges(&self) -> impl Iterator<Item = &Challenge> + '_ {
    self.walk().map(|(_, _, c)| &c.challenge)
  }
}

fn placeholder_concept(main_id: &str, main_name: &str, st: &SubTopic) -> Concept {
  let lower = main_name.to_lowercase();
  let difficulty = if main_id.contains("_intro_") || lower.contains("beginner") || lower.contains("foundations") {
    Difficulty::Novice
  } else if lower.contains("advanced") || main_id.contains("_memory_") || main_id.contains("_classes_adv") {
    Difficulty::Master
  } else {
    Difficulty::Adept
  };
  let id = format!("c_{}_fundamentals", st.id);
  let name = format!("{}: Fundamentals", st.name);
  Concept {
    id: id.clone(),
    challenge: Challenge {
      id,
      title: format!("The Core of {}", st.name),
      description: default_description(&name),
      difficulty,
      starter_code: default_starter_code(&name),
      hint: None,
      explanation: None,
      visual: None,
      next_challenge_id: None,
      placeholder: true,
      criteria: Pending::new(name.clone()),
    },
    name,
  }
}

// ---- content format ----

#[derive(Deserialize)]
struct CurriculumDoc {
  id: String,
  name: String,
  #[serde(default)]
  intro_topic: Option<String>,
  #[serde(default)]
  main_topics: Vec<MainTopicDoc>,
}

#[derive(Deserialize)]
struct MainTopicDoc {
  id: String,
  name: String,
  #[serde(default)]
  description: Option<String>,
  #[serde(default)]
  sub_topics: Vec<SubTopicDoc>,
}

#[derive(Deserialize)]
struct SubTopicDoc {
  id: String,
  name: String,
  #[serde(default)]
  description: Option<String>,
  #[serde(default)]
  concepts: Vec<ConceptDoc>,
}

/// A concept without `criteria` is a placeholder.
#[derive(Deserialize)]
struct ConceptDoc {
  id: String,
  name: String,
  #[serde(default)]
  challenge_id: Option<String>,
  #[serde(default)]
  title: Option<String>,
  #[serde(default)]
  description: Option<String>,
  #[serde(default = "default_difficulty")]
  difficulty: Difficulty,
  #[serde(default)]
  starter_code: Option<String>,
  /// Topic named in the default starter text when `starter_code` is absent.
  #[serde(default)]
  starter_topic: Option<String>,
  #[serde(default)]
  hint: Option<String>,
  #[serde(default)]
  explanation: Option<String>,
  #[serde(default)]
  visual: Option<VisualKind>,
  #[serde(default)]
  next_challenge_id: Option<String>,
  #[serde(default)]
  criteria: Option<CriteriaSpec>,
}

fn default_difficulty() -> Difficulty {
  Difficulty::Adept
}

impl MainTopicDoc {
  fn build(self) -> MainTopic {
    MainTopic {
      id: self.id,
      name: self.name,
      description: self.description,
      sub_topics: self.sub_topics.into_iter().map(SubTopicDoc::build).collect(),
    }
  }
}

impl SubTopicDoc {
  fn build(self) -> SubTopic {
    SubTopic {
      id: self.id,
      name: self.name,
      description: self.description,
      concepts: self.concepts.into_iter().map(ConceptDoc::build).collect(),
    }
  }
}

impl ConceptDoc {
  fn build(self) -> Concept {
    let placeholder = self.criteria.is_none();
    let criteria = match self.criteria {
      Some(spec) => spec.build(),
      None => Pending::new(self.name.clone()),
    };
    let starter_code = self
      .starter_code
      .unwrap_or_else(|| default_starter_code(self.starter_topic.as_deref().unwrap_or(&self.name)));
    Concept {
      challenge: Challenge {
        id: self.challenge_id.unwrap_or_else(|| self.id.clone()),
        title: self.title.unwrap_or_else(|| self.name.clone()),
        description: self.description.unwrap_or_else(|| default_description(&self.name)),
        difficulty: self.difficulty,
        starter_code,
        hint: self.hint,
        explanation: self.explanation,
        visual: self.visual,
        next_challenge_id: self.next_challenge_id,
        placeholder,
        criteria,
      },
      id: self.id,
      name: self.name,
    }
  }
}

#[cfg(test)]
pub(crate) mod fixtures {
  //! Small hand-built curricula for engine tests.

  use super::*;
  use crate::criteria::CriteriaSpec;

  pub fn concept(id: &str, difficulty: Difficulty, placeholder: bool) -> Concept {
    let criteria: Arc<dyn crate::criteria::SolutionCriteria> = if placeholder {
      Pending::new(id)
    } else {
      CriteriaSpec::Binding {
        name: "answer".into(),
        ty: crate::criteria::JsType::Number,
        equals: Some(serde_json::json!(42)),
        requires: None,
        requires_message: None,
      }
      .build()
    };
    Concept {
      id: id.into(),
      name: format!("Concept {id}"),
      challenge: Challenge {
        id: id.into(),
        title: format!("Title {id}"),
        description: format!("Describe {id}"),
        difficulty,
        starter_code: format!("// start {id}\n"),
        hint: None,
        explanation: None,
        visual: None,
        next_challenge_id: None,
        placeholder,
        criteria,
      },
    }
  }

  pub fn sub(id: &str, concepts: Vec<Concept>) -> SubTopic {
    SubTopic { id: id.into(), name: format!("Sub {id}"), description: None, concepts }
  }

  pub fn main(id: &str, subs: Vec<SubTopic>) -> MainTopic {
    MainTopic { id: id.into(), name: format!("Main {id}"), description: None, sub_topics: subs }
  }

  /// intro(i1,i2) | m1: s1(a, b) s2(c) | m2: s3(d)
  ///
  /// Every real concept passes with `let answer = 42;`.
  pub fn small() -> Arc<Curriculum> {
    let d = Difficulty::Novice;
    Arc::new(
      Curriculum::from_parts(
        "test",
        "Test Path",
        None,
        vec![
          main("mt_intro", vec![sub("st_intro", vec![concept("i1", d, false), concept("i2", d, false)])]),
          main(
            "m1",
            vec![
              sub("s1", vec![concept("a", d, false), concept("b", Difficulty::Adept, false)]),
              sub("s2", vec![concept("c", Difficulty::Master, false)]),
            ],
          ),
          main("m2", vec![sub("s3", vec![concept("d", d, false)])]),
        ],
      )
      .unwrap(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::fixtures::*;
  use super::*;
  use pretty_assertions::assert_eq;
  use proptest::prelude::*;

  #[test]
  fn builtin_content_loads() {
    let c = Curriculum::builtin().unwrap();
    assert_eq!(c.id, "js_mastery_path");
    assert_eq!(c.main_topics().len(), 15);
    assert_eq!(c.main_topics().iter().map(|m| m.sub_topics.len()).sum::<usize>(), 48);
    assert_eq!(c.all_challenges().count(), 186);
    assert_eq!(c.intro_topic_id(), Some("mt_intro_js"));

    let real: Vec<&str> = c.all_challenges().filter(|ch| !ch.placeholder).map(|ch| ch.id.as_str()).collect();
    assert_eq!(
      real,
      vec![
        "c_what_is_js_overview",
        "c_history_timeline",
        "c_versions_es6",
        "c_running_js_browser",
        "c1_1_let_string",
        "c1_2_const_number",
        "c_ds_arrays_create_empty",
        "c_ds_arrays_push_item",
        "c_ds_arrays_push_all",
      ]
    );
  }

  #[test]
  fn builtin_placeholders_get_default_texts() {
    let c = Curriculum::builtin().unwrap();
    let quest = c.find_challenge("c1_1_let_string").unwrap();
    assert_eq!(quest.visual, Some(VisualKind::QuestScroll));
    assert!(quest.starter_code.contains("let questName = '';"));
    let stub = c.all_challenges().find(|ch| ch.placeholder).unwrap();
    assert!(stub.starter_code.starts_with("// The Altar of "));
  }

  #[test]
  fn lookups_by_challenge_and_concept() {
    let c = small();
    assert_eq!(c.find_challenge("b").unwrap().difficulty, Difficulty::Adept);
    assert!(c.find_challenge("nope").is_none());
    assert_eq!(c.parent_sub_topic("c").unwrap().id, "s2");
    assert_eq!(c.parent_main_topic("c").unwrap().id, "m1");
    assert_eq!(c.find_concept("d").unwrap().name, "Concept d");
    assert_eq!(c.position("d"), Some(Position { main: 2, sub: 0, concept: 0 }));
    let order: Vec<&str> = c.all_challenges().map(|ch| ch.id.as_str()).collect();
    assert_eq!(order, vec!["i1", "i2", "a", "b", "c", "d"]);
  }

  #[test]
  fn concept_and_challenge_ids_are_both_keys() {
    let text = r#"
      id = "p"
      name = "P"
      [[main_topics]]
      id = "m"
      name = "M"
      [[main_topics.sub_topics]]
      id = "s"
      name = "S"
      [[main_topics.sub_topics.concepts]]
      id = "concept_one"
      challenge_id = "challenge_one"
      name = "One"
      difficulty = 1
      criteria = { kind = "acknowledge", message = "ok" }
    "#;
    let c = Curriculum::from_toml_str(text).unwrap();
    assert_eq!(c.find_concept("concept_one").unwrap().challenge.id, "challenge_one");
    assert_eq!(c.find_concept("challenge_one").unwrap().id, "concept_one");
    assert!(c.find_challenge("concept_one").is_none());
    let ch = c.find_challenge("challenge_one").unwrap();
    assert_eq!(ch.title, "One");
    assert!(!ch.placeholder);
  }

  #[test]
  fn empty_subtopics_get_one_placeholder() {
    let c = Curriculum::from_parts(
      "x",
      "X",
      None,
      vec![
        main("mt_intro_js", vec![sub("st_a", vec![])]),
        MainTopic { name: "Advanced Sorcery".into(), ..main("mt_deep", vec![sub("st_b", vec![])]) },
        main("mt_mid", vec![sub("st_c", vec![])]),
      ],
    )
    .unwrap();
    let ch = c.find_challenge("c_st_a_fundamentals").unwrap();
    assert!(ch.placeholder);
    assert_eq!(ch.difficulty, Difficulty::Novice);
    assert_eq!(ch.title, "The Core of Sub st_a");
    assert_eq!(c.find_concept("c_st_a_fundamentals").unwrap().name, "Sub st_a: Fundamentals");
    assert_eq!(ch.starter_code, "// The Altar of Sub st_a: Fundamentals awaits your inscription...\n");
    assert_eq!(c.find_challenge("c_st_b_fundamentals").unwrap().difficulty, Difficulty::Master);
    assert_eq!(c.find_challenge("c_st_c_fundamentals").unwrap().difficulty, Difficulty::Adept);
  }

  #[test]
  fn rejects_duplicates_and_unknown_intro() {
    let d = Difficulty::Novice;
    let dup = Curriculum::from_parts("x", "X", None, vec![main("m", vec![sub("s", vec![concept("a", d, false), concept("a", d, false)])])]);
    assert!(matches!(dup, Err(CurriculumError::DuplicateChallenge(id)) if id == "a"));
    let intro = Curriculum::from_parts("x", "X", Some("ghost".into()), vec![]);
    assert!(matches!(intro, Err(CurriculumError::UnknownIntroTopic(_))));
  }

  #[test]
  fn empty_curriculum_is_allowed() {
    let c = Curriculum::from_parts("x", "X", None, vec![]).unwrap();
    assert!(c.is_empty());
    assert_eq!(c.intro_topic_id(), None);
  }

  proptest! {
    #[test]
    fn no_subtopic_is_empty_after_synthesis(shape in prop::collection::vec(prop::collection::vec(0usize..4, 0..4), 0..5)) {
      let mut n = 0;
      let mains: Vec<MainTopic> = shape.iter().enumerate().map(|(mi, subs)| {
        main(&format!("m{mi}"), subs.iter().enumerate().map(|(si, count)| {
          sub(&format!("s{mi}_{si}"), (0..*count).map(|_| { n += 1; concept(&format!("c{n}"), Difficulty::Novice, false) }).collect())
        }).collect())
      }).collect();
      let c = Curriculum::from_parts("p", "P", None, mains).unwrap();
      let expected: usize = shape.iter().flatten().map(|count| (*count).max(1)).sum();
      prop_assert_eq!(c.all_challenges().count(), expected);
      for mt in c.main_topics() {
        for st in &mt.sub_topics {
          prop_assert!(!st.concepts.is_empty());
        }
      }
    }
  }
}
