// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::{
        LazyLock,
        atomic::{AtomicU32, Ordering},
    },
};

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

pub const FIELD_ID: &str = "_id";
pub const FIELD_TITLE: &str = "titulo";
pub const FIELD_GENRE: &str = "genero";
pub const FIELD_PLATFORM: &str = "plataforma";
pub const FIELD_RELEASE_YEAR: &str = "lancamento";

pub const TITLE_REQUIRED: &str = "Título é obrigatório e deve ser uma string não vazia";
pub const GENRE_REQUIRED: &str = "Gênero é obrigatório e deve ser uma string não vazia";
pub const PLATFORM_REQUIRED: &str = "Plataforma é obrigatória e deve ser uma string não vazia";
pub const RELEASE_YEAR_REQUIRED: &str = "Lançamento é obrigatório";
pub const RELEASE_YEAR_NOT_A_NUMBER: &str = "Lançamento deve ser um número válido";

const OBJECT_ID_COUNTER_MASK: u32 = 0x00FF_FFFF;

static OBJECT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").unwrap());

static OBJECT_ID_PROCESS_UNIQUE: LazyLock<[u8; 5]> = LazyLock::new(|| {
    let mut bytes = [0_u8; 5];
    rand::rng().fill(&mut bytes);
    bytes
});

static OBJECT_ID_COUNTER: LazyLock<AtomicU32> =
    LazyLock::new(|| AtomicU32::new(rand::rng().random_range(0..=OBJECT_ID_COUNTER_MASK / 2)));

/// Whether `value` is the 24-character hex form of a 12-byte identifier.
pub fn is_valid_object_id(value: &str) -> bool {
    OBJECT_ID_PATTERN.is_match(value)
}

/// 12-byte record identifier: seconds since the epoch (big-endian), five
/// bytes unique to this process, then a 24-bit counter.
///
/// Because the timestamp leads and the counter trails, byte order (and hex
/// order) is creation order. Listing uses that as "newest first".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidObjectId(pub String);

impl fmt::Display for InvalidObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid object id: {:?}", self.0)
    }
}

impl std::error::Error for InvalidObjectId {}

impl ObjectId {
    pub fn new() -> Self {
        let seconds = u32::try_from(Utc::now().timestamp().max(0)).unwrap_or(u32::MAX);
        let counter = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed) & OBJECT_ID_COUNTER_MASK;
        Self::from_parts(seconds, *OBJECT_ID_PROCESS_UNIQUE, counter)
    }

    pub fn from_parts(seconds: u32, process_unique: [u8; 5], counter: u32) -> Self {
        let mut bytes = [0_u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&process_unique);
        bytes[9..].copy_from_slice(&(counter & OBJECT_ID_COUNTER_MASK).to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn parse_str(value: &str) -> Result<Self, InvalidObjectId> {
        if !is_valid_object_id(value) {
            return Err(InvalidObjectId(value.to_string()));
        }

        let mut bytes = [0_u8; 12];
        for (index, byte) in bytes.iter_mut().enumerate() {
            let pair = &value[index * 2..index * 2 + 2];
            *byte =
                u8::from_str_radix(pair, 16).map_err(|_| InvalidObjectId(value.to_string()))?;
        }
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(i64::from(seconds), 0).unwrap_or_default()
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse_str(value)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// The four business fields of a game, as accepted from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameFields {
    pub titulo: String,
    pub genero: String,
    pub plataforma: String,
    /// Kept as the JSON number the client sent so `1995` reads back as `1995`.
    pub lancamento: Number,
}

impl GameFields {
    /// Validates `payload` and extracts the typed fields. Unknown keys are
    /// ignored; every violation is reported, not just the first.
    pub fn from_payload(payload: &Value) -> Result<Self, Vec<String>> {
        match (
            non_blank_str(payload, FIELD_TITLE),
            non_blank_str(payload, FIELD_GENRE),
            non_blank_str(payload, FIELD_PLATFORM),
            release_year(payload),
        ) {
            (Some(titulo), Some(genero), Some(plataforma), Ok(lancamento)) => Ok(Self {
                titulo: titulo.to_string(),
                genero: genero.to_string(),
                plataforma: plataforma.to_string(),
                lancamento: lancamento.clone(),
            }),
            _ => Err(validate_game_payload(payload)),
        }
    }

    /// Storage-level schema check, keyed by field name. Only presence is
    /// enforced here; the request validator is stricter.
    pub fn schema_violations(&self) -> BTreeMap<String, String> {
        let mut violations = BTreeMap::new();
        if self.titulo.is_empty() {
            violations.insert(FIELD_TITLE.to_string(), "O título é obrigatório".to_string());
        }
        if self.genero.is_empty() {
            violations.insert(FIELD_GENRE.to_string(), "O gênero é obrigatório".to_string());
        }
        if self.plataforma.is_empty() {
            violations.insert(
                FIELD_PLATFORM.to_string(),
                "A plataforma é obrigatória".to_string(),
            );
        }
        if !self.lancamento.as_f64().is_some_and(f64::is_finite) {
            violations.insert(
                FIELD_RELEASE_YEAR.to_string(),
                "O lançamento é obrigatório".to_string(),
            );
        }
        violations
    }
}

/// Returns one message per invalid field. An empty list means the payload
/// can be stored.
pub fn validate_game_payload(payload: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if non_blank_str(payload, FIELD_TITLE).is_none() {
        errors.push(TITLE_REQUIRED.to_string());
    }
    if non_blank_str(payload, FIELD_GENRE).is_none() {
        errors.push(GENRE_REQUIRED.to_string());
    }
    if non_blank_str(payload, FIELD_PLATFORM).is_none() {
        errors.push(PLATFORM_REQUIRED.to_string());
    }
    if let Err(message) = release_year(payload) {
        errors.push(message.to_string());
    }

    errors
}

fn non_blank_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

fn release_year<'a>(payload: &'a Value) -> Result<&'a Number, &'static str> {
    match payload.get(FIELD_RELEASE_YEAR) {
        None | Some(Value::Null) => Err(RELEASE_YEAR_REQUIRED),
        Some(Value::Number(number)) if number.as_f64().is_some_and(f64::is_finite) => Ok(number),
        Some(_) => Err(RELEASE_YEAR_NOT_A_NUMBER),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub titulo: String,
    pub genero: String,
    pub plataforma: String,
    pub lancamento: Number,
}

impl Game {
    pub fn new(id: ObjectId, fields: GameFields) -> Self {
        Self {
            id,
            titulo: fields.titulo,
            genero: fields.genero,
            plataforma: fields.plataforma,
            lancamento: fields.lancamento,
        }
    }

    pub fn fields(&self) -> GameFields {
        GameFields {
            titulo: self.titulo.clone(),
            genero: self.genero.clone(),
            plataforma: self.plataforma.clone(),
            lancamento: self.lancamento.clone(),
        }
    }

    /// String form of a named field, used for uniqueness checks.
    pub fn field_value(&self, field: &str) -> Option<String> {
        match field {
            FIELD_ID => Some(self.id.to_hex()),
            FIELD_TITLE => Some(self.titulo.clone()),
            FIELD_GENRE => Some(self.genero.clone()),
            FIELD_PLATFORM => Some(self.plataforma.clone()),
            FIELD_RELEASE_YEAR => Some(self.lancamento.to_string()),
            _ => None,
        }
    }
}

/// Optional list constraints. Each present, non-empty value is a
/// case-insensitive substring match; all of them must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFilter {
    #[serde(default)]
    pub titulo: Option<String>,
    #[serde(default)]
    pub genero: Option<String>,
    #[serde(default)]
    pub plataforma: Option<String>,
}

impl GameFilter {
    pub fn is_empty(&self) -> bool {
        self.constraints().next().is_none()
    }

    pub fn matches(&self, game: &Game) -> bool {
        self.constraints().all(|(field, needle)| {
            let haystack = match field {
                FIELD_TITLE => &game.titulo,
                FIELD_GENRE => &game.genero,
                _ => &game.plataforma,
            };
            haystack.to_lowercase().contains(&needle)
        })
    }

    fn constraints(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        [
            (FIELD_TITLE, &self.titulo),
            (FIELD_GENRE, &self.genero),
            (FIELD_PLATFORM, &self.plataforma),
        ]
        .into_iter()
        .filter_map(|(field, value)| {
            value
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| (field, value.to_lowercase()))
        })
    }
}

/// Success envelope. `count` is only present on list responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub data: T,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            count: None,
            data,
            timestamp: iso_timestamp(Utc::now()),
        }
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub fn list(message: impl Into<String>, data: Vec<T>) -> Self {
        Self {
            count: Some(data.len()),
            ..Self::new(message, data)
        }
    }
}

/// Sorts by identifier, descending, which is creation order reversed.
pub fn sort_newest_first(games: &mut [Game]) {
    games.sort_by(|left, right| right.id.cmp(&left.id));
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-10-18T10:00:00.000Z`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}
