//! Merging model text with tool data into the final reply

use crate::intent::{Intent, QuestionShape};
use crate::tools::{PlantRecord, ToolCallResult, ToolPayload};
use std::fmt::Write;

const NOT_AVAILABLE: &str = "Não disponível";
const SECTION_END: &str = "[Fim das informações técnicas]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    CommonName,
    ScientificName,
    Family,
    Origin,
    Hardiness,
    Cycle,
    Watering,
    Sunlight,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::CommonName => "Nome popular",
            Field::ScientificName => "Nome científico",
            Field::Family => "Família",
            Field::Origin => "Origem",
            Field::Hardiness => "Clima ideal (zonas de rusticidade)",
            Field::Cycle => "Ciclo de vida",
            Field::Watering => "Necessidade de água",
            Field::Sunlight => "Exposição solar",
        }
    }

    fn value(self, record: &PlantRecord) -> Option<String> {
        match self {
            Field::CommonName => record.common_name.clone(),
            Field::ScientificName => record.scientific_name.clone(),
            Field::Family => record.family.clone(),
            Field::Origin => record.origin.clone(),
            Field::Hardiness => record.hardiness.as_ref().and_then(|h| {
                if h.min.is_none() && h.max.is_none() {
                    return None;
                }
                Some(format!(
                    "Min: {}, Max: {}",
                    h.min.as_deref().unwrap_or(NOT_AVAILABLE),
                    h.max.as_deref().unwrap_or(NOT_AVAILABLE)
                ))
            }),
            Field::Cycle => record.cycle.clone(),
            Field::Watering => record.watering.clone(),
            Field::Sunlight => record.sunlight.clone(),
        }
    }
}

fn fields_for(shape: QuestionShape) -> &'static [Field] {
    match shape {
        QuestionShape::Identification => &[
            Field::CommonName,
            Field::ScientificName,
            Field::Family,
            Field::Origin,
        ],
        QuestionShape::Planting => &[
            Field::ScientificName,
            Field::Hardiness,
            Field::Cycle,
            Field::Sunlight,
            Field::Watering,
        ],
        QuestionShape::Care => &[
            Field::ScientificName,
            Field::Family,
            Field::Origin,
            Field::Hardiness,
            Field::Cycle,
            Field::Watering,
            Field::Sunlight,
        ],
    }
}

/// Final reply for a turn.
///
/// Model text comes back untouched unless the tool produced plant records;
/// then a delimited technical section about the best match is appended.
/// Tool failures never show up in the reply.
pub fn compose(
    model_text: &str,
    intent: Intent,
    tool_result: &ToolCallResult,
    shape: QuestionShape,
    fallback_name: &str,
) -> String {
    if intent == Intent::None {
        return model_text.to_string();
    }
    let Some(ToolPayload::Plants(records)) = tool_result.payload() else {
        return model_text.to_string();
    };
    let Some(record) = records.first() else {
        return model_text.to_string();
    };

    let name = record
        .common_name
        .as_deref()
        .or(record.scientific_name.as_deref())
        .unwrap_or(fallback_name);

    let mut reply = String::from(model_text);
    let _ = write!(
        reply,
        "\n\n[Informações técnicas sobre {name} (Fonte: base de plantas)]"
    );
    for field in fields_for(shape) {
        let value = field.value(record);
        let _ = write!(
            reply,
            "\n- {}: {}",
            field.label(),
            value.as_deref().unwrap_or(NOT_AVAILABLE)
        );
    }
    reply.push('\n');
    reply.push_str(SECTION_END);
    reply
}
