use crate::models::{BodyPart, Exercise};

const BUILTINS: [(&str, &str, BodyPart); 15] = [
    ("ex1", "benchPress", BodyPart::Chest),
    ("ex2", "dumbbellFlyes", BodyPart::Chest),
    ("ex3", "pushups", BodyPart::Chest),
    ("ex4", "pullups", BodyPart::Back),
    ("ex5", "bentoverRows", BodyPart::Back),
    ("ex6", "deadlifts", BodyPart::Back),
    ("ex7", "squats", BodyPart::Legs),
    ("ex8", "legPress", BodyPart::Legs),
    ("ex9", "lunges", BodyPart::Legs),
    ("ex10", "overheadPress", BodyPart::Shoulders),
    ("ex11", "lateralRaises", BodyPart::Shoulders),
    ("ex12", "bicepCurls", BodyPart::Arms),
    ("ex13", "tricepDips", BodyPart::Arms),
    ("ex14", "plank", BodyPart::Core),
    ("ex15", "crunches", BodyPart::Core),
];

/// The built-in exercise library every account starts with.
///
/// Names and descriptions are translation keys, not display strings.
#[must_use]
pub fn builtin_exercises() -> Vec<Exercise> {
    BUILTINS
        .iter()
        .map(|&(id, name, body_part)| Exercise {
            id: id.to_string(),
            name: name.to_string(),
            body_part,
            description: format!("{name}Description"),
            emoji: Some(body_part.emoji().to_string()),
            is_custom: None,
        })
        .collect()
}

/// Name of the built-in exercise that owns `id`, if any.
#[must_use]
pub fn reserved_name(id: &str) -> Option<&'static str> {
    BUILTINS
        .iter()
        .find(|(seed_id, _, _)| *seed_id == id)
        .map(|(_, name, _)| *name)
}
