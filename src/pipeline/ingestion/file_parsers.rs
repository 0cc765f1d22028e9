//! Turn uploaded documents into an import context plus a stream of raw data.
//! Anything wrong with the document as a whole is fatal for the job.

use futures::stream::{self, BoxStream, StreamExt};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::common::constants::{BATCH_MANUAL_SERVICE_SUFFIX, DIRECT_MANUAL_SERVICE_SUFFIX};
use crate::common::error::ImportFatalError;
use crate::domain::{get_gpt_config, Game, ImportContext, ImportType, Playtype};

/// Raw data ready to be handed to a converter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedImport {
    pub context: ImportContext,
    pub data: Vec<Value>,
}

impl ParsedImport {
    pub fn into_producer(self) -> BoxStream<'static, Result<Value, ImportFatalError>> {
        stream::iter(self.data.into_iter().map(Ok)).boxed()
    }
}

static BATCH_MANUAL_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["meta", "scores"],
        "properties": {
            "meta": {
                "type": "object",
                "required": ["game", "playtype", "service"],
                "properties": {
                    "game": {"type": "string"},
                    "playtype": {"type": "string"},
                    "service": {"type": "string", "minLength": 3, "maxLength": 15},
                    "version": {"type": ["string", "null"]}
                }
            },
            "scores": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["score", "lamp", "matchType", "identifier"],
                    "properties": {
                        "score": {"type": "number", "minimum": 0},
                        "lamp": {"type": "string"},
                        "matchType": {"enum": ["songTitle", "songID", "inGameID", "chartHash"]},
                        "identifier": {"type": "string"},
                        "difficulty": {"type": ["string", "null"]},
                        "timeAchieved": {"type": ["integer", "null"]},
                        "comment": {"type": ["string", "null"], "minLength": 3, "maxLength": 240},
                        "judgements": {
                            "type": "object",
                            "additionalProperties": {"type": "integer", "minimum": 0}
                        },
                        "hitMeta": {"type": "object"},
                        "scoreMeta": {"type": "object"}
                    }
                }
            }
        }
    })
});

static BATCH_MANUAL_VALIDATOR: Lazy<Option<JSONSchema>> =
    Lazy::new(|| JSONSchema::compile(&BATCH_MANUAL_SCHEMA).ok());

#[derive(Debug, Deserialize)]
struct BatchManualMeta {
    game: String,
    playtype: String,
    service: String,
    #[serde(default)]
    version: Option<String>,
}

fn invalid(msg: impl Into<String>) -> ImportFatalError {
    ImportFatalError::InvalidInput(msg.into())
}

/// Parse a batch-manual document, for either the file or the direct-submission
/// import type.
pub fn parse_batch_manual(bytes: &[u8], import_type: ImportType) -> Result<ParsedImport, ImportFatalError> {
    let suffix = match import_type {
        ImportType::FileBatchManual => BATCH_MANUAL_SERVICE_SUFFIX,
        ImportType::IrDirectManual => DIRECT_MANUAL_SERVICE_SUFFIX,
        other => return Err(invalid(format!("{} is not a batch-manual import type", other))),
    };

    let doc: Value = serde_json::from_slice(bytes)
        .map_err(|e| invalid(format!("Invalid BATCH-MANUAL (not JSON): {}", e)))?;
    validate_batch_manual(&doc)?;

    let meta: BatchManualMeta = serde_json::from_value(doc["meta"].clone())
        .map_err(|e| invalid(format!("Invalid BATCH-MANUAL meta: {}", e)))?;
    let game = Game::parse(&meta.game).ok_or_else(|| invalid(format!("Invalid game {}.", meta.game)))?;
    let playtype = Playtype::parse(&meta.playtype)
        .ok_or_else(|| invalid(format!("Invalid playtype {}.", meta.playtype)))?;
    let gpt = get_gpt_config(game, playtype)
        .ok_or_else(|| invalid(format!("Unsupported game/playtype {} {}.", game, playtype)))?;

    if let Some(version) = &meta.version {
        if !gpt.versions.contains(&version.as_str()) {
            return Err(invalid(format!("Unsupported version {} for {} {}.", version, game, playtype)));
        }
    }

    let data = match doc.get("scores") {
        Some(Value::Array(scores)) => scores.clone(),
        _ => Vec::new(),
    };
    info!("📄 Parsed BATCH-MANUAL with {} scores for {} {}", data.len(), game, playtype);

    Ok(ParsedImport {
        context: ImportContext {
            game,
            playtype: Some(playtype),
            service: format!("{}{}", meta.service, suffix),
            version: meta.version,
            import_type,
            time_received: None,
        },
        data,
    })
}

fn validate_batch_manual(doc: &Value) -> Result<(), ImportFatalError> {
    let validator = BATCH_MANUAL_VALIDATOR
        .as_ref()
        .ok_or_else(|| invalid("BATCH-MANUAL schema failed to compile"))?;

    if let Err(errors) = validator.validate(doc) {
        let messages: Vec<String> = errors
            .take(5)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        return Err(invalid(format!("Invalid BATCH-MANUAL: {}", messages.join("; "))));
    }
    Ok(())
}

const PRE_HV_HEADER_COUNT: usize = 27;
const HV_HEADER_COUNT: usize = 41;
const CELLS_PER_DIFFICULTY: usize = 7;
const FIRST_DIFFICULTY_CELL: usize = 5;

const EAM_VERSION_NAMES: &[(&str, u32)] = &[
    ("1st&substream", 1),
    ("2nd style", 2),
    ("3rd style", 3),
    ("4th style", 4),
    ("5th style", 5),
    ("6th style", 6),
    ("7th style", 7),
    ("8th style", 8),
    ("9th style", 9),
    ("10th style", 10),
    ("IIDX RED", 11),
    ("HAPPY SKY", 12),
    ("DistorteD", 13),
    ("GOLD", 14),
    ("DJ TROOPERS", 15),
    ("EMPRESS", 16),
    ("SIRIUS", 17),
    ("Resort Anthem", 18),
    ("Lincle", 19),
    ("tricoro", 20),
    ("SPADA", 21),
    ("PENDUAL", 22),
    ("copula", 23),
    ("SINOBUZ", 24),
    ("CANNON BALLERS", 25),
    ("Rootage", 26),
    ("HEROIC VERSE", 27),
    ("BISTROVER", 28),
    ("CastHour", 29),
    ("RESIDENT", 30),
];

/// Split on commas without quoting rules. Every row must have as many cells as
/// the header.
fn naive_csv(text: &str) -> Result<(Vec<&str>, Vec<Vec<&str>>), ImportFatalError> {
    let mut lines = text
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty());

    let headers: Vec<&str> = lines
        .next()
        .ok_or_else(|| invalid("Invalid CSV provided. The file is empty."))?
        .split(',')
        .collect();

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split(',').collect();
        if cells.len() != headers.len() {
            return Err(invalid(format!(
                "Row {} has {} cells, but the header has {}.",
                i + 1,
                cells.len(),
                headers.len()
            )));
        }
        rows.push(cells);
    }
    Ok((headers, rows))
}

/// Parse an e-amusement IIDX score CSV. The game version is the newest version
/// named in the file.
pub fn parse_eamusement_iidx_csv(bytes: &[u8], playtype: Playtype) -> Result<ParsedImport, ImportFatalError> {
    if !matches!(playtype, Playtype::SP | Playtype::DP) {
        return Err(invalid(format!("Invalid playtype of {} given.", playtype)));
    }
    let text = std::str::from_utf8(bytes).map_err(|_| invalid("Invalid CSV provided. The file is not UTF-8."))?;
    let text = text.trim_start_matches('\u{feff}');
    let (headers, rows) = naive_csv(text)?;

    let has_beginner_and_legg = match headers.len() {
        PRE_HV_HEADER_COUNT => false,
        HV_HEADER_COUNT => true,
        n => {
            return Err(invalid(format!(
                "Invalid CSV provided. CSV does not have the correct amount of headers ({}).",
                n
            )))
        }
    };
    debug!(has_beginner_and_legg, "resolved CSV headers");

    let difficulties: &[&str] = if has_beginner_and_legg {
        &["BEGINNER", "NORMAL", "HYPER", "ANOTHER", "LEGGENDARIA"]
    } else {
        &["NORMAL", "HYPER", "ANOTHER"]
    };

    let mut game_version = 0;
    let mut data = Vec::with_capacity(rows.len());
    for cells in &rows {
        let version_name = cells[0];
        let version = EAM_VERSION_NAMES
            .iter()
            .find(|(name, _)| *name == version_name)
            .map(|(_, v)| *v)
            .ok_or_else(|| invalid(format!("Invalid/Unsupported Eamusement Version Name {}.", version_name)))?;
        game_version = game_version.max(version);

        let scores: Vec<Value> = difficulties
            .iter()
            .enumerate()
            .map(|(d, difficulty)| {
                let di = FIRST_DIFFICULTY_CELL + d * CELLS_PER_DIFFICULTY;
                json!({
                    "difficulty": difficulty,
                    "level": cells[di],
                    "exscore": cells[di + 1],
                    "pgreat": cells[di + 2],
                    "great": cells[di + 3],
                    "bp": cells[di + 4],
                    "lamp": cells[di + 5],
                })
            })
            .collect();

        data.push(json!({
            "title": cells[1].trim(),
            "timestamp": cells[headers.len() - 1].trim(),
            "hasBeginnerAndLegg": has_beginner_and_legg,
            "scores": scores,
        }));
    }

    let version = game_version.to_string();
    let gpt = get_gpt_config(Game::Iidx, playtype)
        .ok_or_else(|| invalid(format!("Unsupported playtype {}.", playtype)))?;
    if !gpt.versions.contains(&version.as_str()) {
        return Err(invalid(format!(
            "Unsupported version '{}'. Is your CSV properly filled out?",
            version
        )));
    }

    info!("📄 Parsed e-amusement CSV: {} rows, version {}", data.len(), version);
    Ok(ParsedImport {
        context: ImportContext {
            game: Game::Iidx,
            playtype: Some(playtype),
            service: "e-amusement".to_string(),
            version: Some(version),
            import_type: ImportType::FileEamusementIidxCsv,
            time_received: None,
        },
        data,
    })
}

/// A single score pushed by the fervidex game hook.
pub fn parse_fervidex(
    bytes: &[u8],
    version: &str,
    time_received: i64,
) -> Result<ParsedImport, ImportFatalError> {
    let payload: Value = serde_json::from_slice(bytes)
        .map_err(|e| invalid(format!("Invalid Fervidex Request? {}", e)))?;
    if !payload.is_object() {
        return Err(invalid("Invalid Fervidex Request? Expected an object."));
    }

    let supported = [Playtype::SP, Playtype::DP].iter().any(|pt| {
        get_gpt_config(Game::Iidx, *pt)
            .map(|gpt| gpt.versions.contains(&version))
            .unwrap_or(false)
    });
    if !supported {
        return Err(invalid(format!("Unsupported game version {}.", version)));
    }

    Ok(ParsedImport {
        context: ImportContext {
            game: Game::Iidx,
            playtype: None,
            service: "Fervidex".to_string(),
            version: Some(version.to_string()),
            import_type: ImportType::IrFervidex,
            time_received: Some(time_received),
        },
        data: vec![payload],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(scores: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "meta": {"game": "iidx", "playtype": "SP", "service": "foo"},
            "scores": scores,
        }))
        .unwrap()
    }

    #[test]
    fn batch_manual_builds_context_with_service_suffix() {
        let bytes = batch(json!([
            {"score": 1500, "lamp": "CLEAR", "matchType": "songTitle", "identifier": "A", "difficulty": "ANOTHER"}
        ]));
        let parsed = parse_batch_manual(&bytes, ImportType::FileBatchManual).unwrap();
        assert_eq!(parsed.context.service, "foo (BATCH-MANUAL)");
        assert_eq!(parsed.context.playtype, Some(Playtype::SP));
        assert_eq!(parsed.data.len(), 1);

        let direct = parse_batch_manual(&bytes, ImportType::IrDirectManual).unwrap();
        assert_eq!(direct.context.service, "foo (DIRECT-MANUAL)");
    }

    #[test]
    fn batch_manual_rejects_invalid_documents() {
        let bad_match = batch(json!([
            {"score": 1, "lamp": "CLEAR", "matchType": "nonsense", "identifier": "A"}
        ]));
        assert!(matches!(
            parse_batch_manual(&bad_match, ImportType::FileBatchManual),
            Err(ImportFatalError::InvalidInput(_))
        ));

        let bad_game = serde_json::to_vec(&json!({
            "meta": {"game": "popn", "playtype": "9B", "service": "foo"},
            "scores": []
        }))
        .unwrap();
        assert!(parse_batch_manual(&bad_game, ImportType::FileBatchManual).is_err());
        assert!(parse_batch_manual(b"not json", ImportType::FileBatchManual).is_err());
        assert!(parse_batch_manual(&batch(json!([])), ImportType::IrFervidex).is_err());
    }

    fn csv_row(version: &str, title: &str) -> String {
        // version,title,genre,artist,playcount, then 3 groups of 7, then timestamp
        let group = "10,1500,600,300,12,HARD CLEAR,AA";
        format!("{},{},GENRE,ARTIST,4,{},{},{},2020-01-01 12:00", version, title, group, group, group)
    }

    fn pre_hv_header() -> String {
        let mut headers = vec!["version", "title", "genre", "artist", "playcount"];
        for _ in 0..3 {
            headers.extend(["level", "exscore", "pgreat", "great", "bp", "lamp", "grade"]);
        }
        headers.push("timestamp");
        headers.join(",")
    }

    #[test]
    fn csv_uses_newest_version_and_groups_difficulties() {
        let csv = format!(
            "{}\n{}\n{}\n",
            pre_hv_header(),
            csv_row("Rootage", "Old Song"),
            csv_row("HEROIC VERSE", "New Song")
        );
        let parsed = parse_eamusement_iidx_csv(csv.as_bytes(), Playtype::SP).unwrap();
        assert_eq!(parsed.context.version.as_deref(), Some("27"));
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[1]["title"], "New Song");
        assert_eq!(parsed.data[1]["hasBeginnerAndLegg"], false);
        let scores = parsed.data[0]["scores"].as_array().unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[2]["difficulty"], "ANOTHER");
        assert_eq!(scores[2]["exscore"], "1500");
        assert_eq!(scores[2]["lamp"], "HARD CLEAR");
    }

    #[test]
    fn csv_rejects_bad_shapes() {
        let bad_header = "a,b,c\n1,2,3\n";
        assert!(parse_eamusement_iidx_csv(bad_header.as_bytes(), Playtype::SP).is_err());

        let short_row = format!("{}\nHEROIC VERSE,x,y\n", pre_hv_header());
        assert!(parse_eamusement_iidx_csv(short_row.as_bytes(), Playtype::SP).is_err());

        let unknown = format!("{}\n{}\n", pre_hv_header(), csv_row("IIDX 99", "x"));
        assert!(parse_eamusement_iidx_csv(unknown.as_bytes(), Playtype::SP).is_err());

        let too_old = format!("{}\n{}\n", pre_hv_header(), csv_row("Lincle", "x"));
        assert!(parse_eamusement_iidx_csv(too_old.as_bytes(), Playtype::SP).is_err());
    }
}
