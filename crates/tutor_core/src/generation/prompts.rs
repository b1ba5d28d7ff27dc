//! crates/tutor_core/src/generation/prompts.rs
//!
//! Prompt templates for question generation and parameter extraction.

use crate::domain::{Difficulty, QuestionType};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"Tu es un agent spécialisé dans l'extraction de paramètres pédagogiques.

Ton rôle est d'analyser les instructions d'un enseignant et d'extraire les paramètres de façon structurée.

Tu dois répondre UNIQUEMENT avec un JSON valide contenant les paramètres extraits.
Aucun texte avant ou après le JSON.

Format de réponse attendu:
{
    "count": 5,
    "type": "mcq",
    "subject": "description du sujet spécifique",
    "difficulty": "medium"
}

Types acceptés: "mcq", "open_ended", "true_false", "fill_blank"
Difficultés acceptées: "easy", "medium", "hard""#;

pub fn extraction_user_prompt(instruction: &str) -> String {
    format!(
        r#"Analyse ces instructions d'enseignant et extrait les paramètres:

INSTRUCTIONS: "{instruction}"

Extrait:
- Le NOMBRE de questions demandées (si non spécifié, utilise 5)
- Le TYPE de questions (QCM=mcq, questions ouvertes=open_ended, vrai/faux=true_false, à compléter=fill_blank)
- Le SUJET spécifique mentionné (par ex: "boucle FOR", "variables Python", etc.)
- LA DIFFICULTÉ si mentionnée (facile=easy, moyen=medium, difficile=hard, sinon medium)

Exemples:
- "2 QCM sur les boucles FOR" → {{"count": 2, "type": "mcq", "subject": "boucles FOR", "difficulty": "medium"}}
- "5 questions ouvertes difficiles sur les variables" → {{"count": 5, "type": "open_ended", "subject": "variables", "difficulty": "hard"}}

Analyse maintenant:"#
    )
}

fn difficulty_guideline(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "questions simples et directes, testant la compréhension basique",
        Difficulty::Medium => "questions nécessitant de la réflexion et de la compréhension approfondie",
        Difficulty::Hard => "questions complexes nécessitant analyse, synthèse et application des concepts",
    }
}

pub fn system_prompt(section_name: &str, question_type: QuestionType, difficulty: Difficulty) -> String {
    format!(
        r#"Tu es un expert pédagogique créant des exercices pour le cours "{section_name}".

Crée des {guideline} adaptées au niveau universitaire.

IMPORTANT: Tu dois répondre UNIQUEMENT avec un tableau JSON valide contenant les questions.
Aucun texte avant ou après le JSON.

Pour les questions de type {kind}, utilise exactement le format JSON indiqué."#,
        guideline = difficulty_guideline(difficulty),
        kind = question_type.as_str(),
    )
}

/// The literal JSON shape the model is asked to reproduce.
pub fn format_example(question_type: QuestionType) -> &'static str {
    match question_type {
        QuestionType::Mcq => {
            r#"[
    {
        "text": "Question claire et précise basée sur le contenu",
        "options": ["Option A", "Option B", "Option C", "Option D"],
        "correct_answer": "Option A",
        "explanation": "Explication pédagogique de pourquoi c'est la bonne réponse",
        "points": 1
    }
]"#
        }
        QuestionType::OpenEnded => {
            r#"[
    {
        "text": "Question ouverte stimulante basée sur le contenu",
        "expected_keywords": ["concept1", "concept2", "concept3"],
        "explanation": "Guide de correction avec les éléments attendus dans la réponse",
        "points": 2
    }
]"#
        }
        QuestionType::TrueFalse => {
            r#"[
    {
        "text": "Affirmation à évaluer comme vraie ou fausse",
        "correct_answer": "true",
        "explanation": "Explication détaillée",
        "points": 1
    }
]"#
        }
        QuestionType::FillBlank => {
            r#"[
    {
        "text": "Phrase avec un _____ à compléter",
        "correct_answer": "mot manquant",
        "explanation": "Explication du terme correct",
        "points": 1
    }
]"#
        }
    }
}

pub fn user_prompt(
    content: &str,
    count: usize,
    question_type: QuestionType,
    difficulty: Difficulty,
) -> String {
    format!(
        r#"Basé sur ce contenu du cours:

{content}

Génère exactement {count} questions de type {kind} de niveau {level}.

Format JSON attendu:
{example}

Assure-toi que:
1. Les questions sont directement liées au contenu fourni
2. Les questions sont variées et couvrent différents aspects
3. Les explications sont pédagogiques et aident à l'apprentissage
4. Le JSON est valide et suit exactement le format

Génère les {count} questions maintenant:"#,
        kind = question_type.as_str(),
        level = difficulty.as_str(),
        example = format_example(question_type),
    )
}

pub fn user_prompt_with_subject(
    content: &str,
    count: usize,
    question_type: QuestionType,
    difficulty: Difficulty,
    subject: &str,
) -> String {
    format!(
        r#"Basé sur ce contenu du cours:

{content}

Génère exactement {count} questions de type {kind} de niveau {level}.

FOCUS SPÉCIAL: Les questions doivent porter EXCLUSIVEMENT sur le sujet suivant: "{subject}"

Format JSON attendu:
{example}

Assure-toi que:
1. TOUTES les questions portent UNIQUEMENT sur "{subject}"
2. Les questions sont directement liées au contenu fourni concernant "{subject}"
3. Aucune question ne doit traiter d'autres sujets que "{subject}"
4. Les explications sont pédagogiques et aident à l'apprentissage
5. Le JSON est valide et suit exactement le format

Génère exactement {count} questions sur "{subject}" maintenant:"#,
        kind = question_type.as_str(),
        level = difficulty.as_str(),
        example = format_example(question_type),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_states_count_and_format() {
        let prompt = user_prompt("Les boucles.", 4, QuestionType::TrueFalse, Difficulty::Easy);
        assert!(prompt.contains("Génère exactement 4 questions de type true_false de niveau easy."));
        assert!(prompt.contains("\"correct_answer\": \"true\""));
        assert!(prompt.starts_with("Basé sur ce contenu du cours:\n\nLes boucles."));
    }

    #[test]
    fn subject_prompt_focuses_on_subject() {
        let prompt = user_prompt_with_subject("x", 2, QuestionType::Mcq, Difficulty::Medium, "boucles for");
        assert!(prompt.contains("EXCLUSIVEMENT sur le sujet suivant: \"boucles for\""));
        assert!(prompt.ends_with("Génère exactement 2 questions sur \"boucles for\" maintenant:"));
    }

    #[test]
    fn system_prompt_carries_difficulty_guidance() {
        let prompt = system_prompt("Algorithmique", QuestionType::OpenEnded, Difficulty::Hard);
        assert!(prompt.contains("\"Algorithmique\""));
        assert!(prompt.contains("analyse, synthèse"));
        assert!(prompt.contains("UNIQUEMENT avec un tableau JSON"));
    }

    #[test]
    fn extraction_prompt_quotes_the_instruction() {
        let prompt = extraction_user_prompt("3 QCM sur les listes");
        assert!(prompt.contains("INSTRUCTIONS: \"3 QCM sur les listes\""));
        assert!(prompt.contains(r#"{"count": 2, "type": "mcq""#));
    }
}
