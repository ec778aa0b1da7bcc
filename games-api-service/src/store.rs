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

use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    types::{AttributeValue, ReturnValue},
};
use games_common::{
    FIELD_GENRE, FIELD_ID, FIELD_PLATFORM, FIELD_RELEASE_YEAR, FIELD_TITLE, Game, GameFields,
    GameFilter, ObjectId, sort_newest_first,
};
use serde_json::Number;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;

/// Document-store operations the handlers depend on.
///
/// Lookups by id take the raw path value and fail with
/// [`StoreError::Cast`] when it is not a valid identifier.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
    async fn create(&self, fields: GameFields) -> Result<Game, StoreError>;
    /// Matching records, newest first.
    async fn find(&self, filter: &GameFilter) -> Result<Vec<Game>, StoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Game>, StoreError>;
    /// Replaces the business fields and returns the updated record.
    async fn find_by_id_and_update(
        &self,
        id: &str,
        fields: GameFields,
    ) -> Result<Option<Game>, StoreError>;
    /// Removes the record and returns its last state.
    async fn find_by_id_and_delete(&self, id: &str) -> Result<Option<Game>, StoreError>;
}

fn check_schema(fields: &GameFields) -> Result<(), StoreError> {
    let violations = fields.schema_violations();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Validation(violations))
    }
}

/// First unique field whose value `candidate` shares with another record.
fn find_conflict<'a, I>(unique_fields: &[String], candidate: &Game, existing: I) -> Option<String>
where
    I: IntoIterator<Item = &'a Game> + Clone,
{
    unique_fields.iter().find_map(|field| {
        let value = candidate.field_value(field)?;
        existing
            .clone()
            .into_iter()
            .any(|other| other.id != candidate.id && other.field_value(field) == Some(value.clone()))
            .then(|| field.clone())
    })
}

fn check_unique<'a, I>(unique_fields: &[String], candidate: &Game, existing: I) -> Result<(), StoreError>
where
    I: IntoIterator<Item = &'a Game> + Clone,
{
    match find_conflict(unique_fields, candidate, existing) {
        Some(field) => Err(StoreError::Duplicate { field }),
        None => Ok(()),
    }
}

#[derive(Default)]
pub struct InMemoryGameStore {
    games: RwLock<BTreeMap<ObjectId, Game>>,
    unique_fields: Vec<String>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unique_fields(unique_fields: Vec<String>) -> Self {
        Self {
            games: RwLock::default(),
            unique_fields,
        }
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create(&self, fields: GameFields) -> Result<Game, StoreError> {
        check_schema(&fields)?;
        let mut games = self.games.write().await;
        let game = Game::new(ObjectId::new(), fields);
        if games.contains_key(&game.id) {
            return Err(StoreError::Duplicate {
                field: FIELD_ID.to_string(),
            });
        }
        check_unique(&self.unique_fields, &game, games.values())?;
        games.insert(game.id, game.clone());
        Ok(game)
    }

    async fn find(&self, filter: &GameFilter) -> Result<Vec<Game>, StoreError> {
        let games = self.games.read().await;
        Ok(games
            .values()
            .rev()
            .filter(|game| filter.matches(game))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Game>, StoreError> {
        let id = ObjectId::parse_str(id)?;
        Ok(self.games.read().await.get(&id).cloned())
    }

    async fn find_by_id_and_update(
        &self,
        id: &str,
        fields: GameFields,
    ) -> Result<Option<Game>, StoreError> {
        let id = ObjectId::parse_str(id)?;
        let mut games = self.games.write().await;
        if !games.contains_key(&id) {
            return Ok(None);
        }
        check_schema(&fields)?;
        let game = Game::new(id, fields);
        check_unique(&self.unique_fields, &game, games.values())?;
        games.insert(id, game.clone());
        Ok(Some(game))
    }

    async fn find_by_id_and_delete(&self, id: &str) -> Result<Option<Game>, StoreError> {
        let id = ObjectId::parse_str(id)?;
        Ok(self.games.write().await.remove(&id))
    }
}

/// Games kept in one DynamoDB table keyed by the string attribute `_id`.
///
/// Filtering and ordering happen here after a full scan; DynamoDB has no
/// case-insensitive `contains`. Unique fields are checked against that
/// scan before writing, so two racing writers can still both succeed.
#[derive(Clone)]
pub struct DynamoGameStore {
    client: DynamoClient,
    table_name: String,
    unique_fields: Vec<String>,
}

impl DynamoGameStore {
    pub async fn connect(table_name: String, unique_fields: Vec<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(endpoint) = std::env::var("DYNAMODB_ENDPOINT") {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        info!(table_name = %table_name, "games DynamoDB store enabled");
        Self {
            client: DynamoClient::new(&config),
            table_name,
            unique_fields,
        }
    }

    async fn scan_all(&self) -> Result<Vec<Game>, StoreError> {
        let mut games = Vec::new();
        let mut start_key = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .context("failed to scan games table")?;

            for item in output.items() {
                games.push(game_from_item(item)?);
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        debug!(table_name = %self.table_name, count = games.len(), "scanned games table");
        Ok(games)
    }

    async fn ensure_unique(&self, game: &Game) -> Result<(), StoreError> {
        if self.unique_fields.is_empty() {
            return Ok(());
        }
        let existing = self.scan_all().await?;
        check_unique(&self.unique_fields, game, existing.iter())
    }
}

#[async_trait]
impl GameStore for DynamoGameStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
            .with_context(|| format!("failed to describe table {}", self.table_name))?;
        Ok(())
    }

    async fn create(&self, fields: GameFields) -> Result<Game, StoreError> {
        check_schema(&fields)?;
        let game = Game::new(ObjectId::new(), dynamo_fields(fields));
        self.ensure_unique(&game).await?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(game_item(&game)))
            .condition_expression("attribute_not_exists(#id)")
            .expression_attribute_names("#id", FIELD_ID)
            .send()
            .await;

        match result {
            Ok(_) => Ok(game),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|error| error.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::Duplicate {
                    field: FIELD_ID.to_string(),
                })
            }
            Err(error) => Err(anyhow::Error::new(error)
                .context("failed to insert game")
                .into()),
        }
    }

    async fn find(&self, filter: &GameFilter) -> Result<Vec<Game>, StoreError> {
        let mut games: Vec<Game> = self
            .scan_all()
            .await?
            .into_iter()
            .filter(|game| filter.matches(game))
            .collect();
        sort_newest_first(&mut games);
        Ok(games)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Game>, StoreError> {
        let id = ObjectId::parse_str(id)?;
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(FIELD_ID, AttributeValue::S(id.to_hex()))
            .send()
            .await
            .context("failed to read game")?;

        Ok(output.item().map(game_from_item).transpose()?)
    }

    async fn find_by_id_and_update(
        &self,
        id: &str,
        fields: GameFields,
    ) -> Result<Option<Game>, StoreError> {
        let id = ObjectId::parse_str(id)?;
        if self.find_by_id(&id.to_hex()).await?.is_none() {
            return Ok(None);
        }
        check_schema(&fields)?;
        let game = Game::new(id, dynamo_fields(fields));
        self.ensure_unique(&game).await?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(game_item(&game)))
            .condition_expression("attribute_exists(#id)")
            .expression_attribute_names("#id", FIELD_ID)
            .send()
            .await;

        match result {
            Ok(_) => Ok(Some(game)),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|error| error.is_conditional_check_failed_exception()) =>
            {
                Ok(None)
            }
            Err(error) => Err(anyhow::Error::new(error)
                .context("failed to replace game")
                .into()),
        }
    }

    async fn find_by_id_and_delete(&self, id: &str) -> Result<Option<Game>, StoreError> {
        let id = ObjectId::parse_str(id)?;
        let output = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key(FIELD_ID, AttributeValue::S(id.to_hex()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .context("failed to delete game")?;

        Ok(output.attributes().map(game_from_item).transpose()?)
    }
}

const MAX_EXACT_F64_INTEGER: f64 = 9_007_199_254_740_992.0;

/// DynamoDB stores numbers without a trailing `.0`, so an integral float
/// year is kept as an integer to read back the way it was answered.
fn dynamo_fields(mut fields: GameFields) -> GameFields {
    let integral = fields.lancamento.as_f64().filter(|year| {
        fields.lancamento.is_f64() && year.fract() == 0.0 && year.abs() < MAX_EXACT_F64_INTEGER
    });
    if let Some(year) = integral {
        fields.lancamento = Number::from(year as i64);
    }
    fields
}

fn game_item(game: &Game) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert(FIELD_ID.to_string(), AttributeValue::S(game.id.to_hex()));
    item.insert(
        FIELD_TITLE.to_string(),
        AttributeValue::S(game.titulo.clone()),
    );
    item.insert(
        FIELD_GENRE.to_string(),
        AttributeValue::S(game.genero.clone()),
    );
    item.insert(
        FIELD_PLATFORM.to_string(),
        AttributeValue::S(game.plataforma.clone()),
    );
    item.insert(
        FIELD_RELEASE_YEAR.to_string(),
        AttributeValue::N(game.lancamento.to_string()),
    );
    item
}

fn game_from_item(item: &HashMap<String, AttributeValue>) -> anyhow::Result<Game> {
    let string_attr = |name: &str| -> anyhow::Result<String> {
        item.get(name)
            .and_then(|value| value.as_s().ok())
            .cloned()
            .with_context(|| format!("game item is missing string attribute {name}"))
    };

    let id = string_attr(FIELD_ID)?;
    let release_year = item
        .get(FIELD_RELEASE_YEAR)
        .and_then(|value| value.as_n().ok())
        .with_context(|| format!("game {id} is missing numeric attribute {FIELD_RELEASE_YEAR}"))?;

    Ok(Game {
        id: ObjectId::parse_str(&id).with_context(|| format!("game item has bad id {id:?}"))?,
        titulo: string_attr(FIELD_TITLE)?,
        genero: string_attr(FIELD_GENRE)?,
        plataforma: string_attr(FIELD_PLATFORM)?,
        lancamento: serde_json::from_str(release_year)
            .with_context(|| format!("game {id} has bad {FIELD_RELEASE_YEAR} {release_year:?}"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(titulo: &str, genero: &str, plataforma: &str, lancamento: i64) -> GameFields {
        GameFields {
            titulo: titulo.to_string(),
            genero: genero.to_string(),
            plataforma: plataforma.to_string(),
            lancamento: Number::from(lancamento),
        }
    }

    const MISSING_ID: &str = "0123456789abcdef01234567";

    #[tokio::test]
    async fn create_assigns_id_and_keeps_fields() {
        let store = InMemoryGameStore::new();
        let created = store.create(fields("Chrono", "RPG", "SNES", 1995)).await.unwrap();

        assert_eq!(created.fields(), fields("Chrono", "RPG", "SNES", 1995));
        let found = store.find_by_id(&created.id.to_hex()).await.unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn find_returns_newest_first_and_applies_filter() {
        let store = InMemoryGameStore::new();
        let chrono = store.create(fields("Chrono", "RPG", "SNES", 1995)).await.unwrap();
        let doom = store.create(fields("Doom", "FPS", "PC", 1993)).await.unwrap();
        let persona = store.create(fields("Persona 5", "JRPG", "PS4", 2016)).await.unwrap();

        let all = store.find(&GameFilter::default()).await.unwrap();
        assert_eq!(all, vec![persona.clone(), doom, chrono.clone()]);

        let rpg = store
            .find(&GameFilter {
                genero: Some("rpg".to_string()),
                ..GameFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(rpg, vec![persona, chrono]);
    }

    #[tokio::test]
    async fn lookups_reject_malformed_ids_with_cast_error() {
        let store = InMemoryGameStore::new();
        assert!(matches!(
            store.find_by_id("123").await,
            Err(StoreError::Cast(value)) if value == "123"
        ));
        assert!(matches!(
            store.find_by_id_and_delete("xyz").await,
            Err(StoreError::Cast(_))
        ));
        assert!(matches!(
            store
                .find_by_id_and_update("xyz", fields("a", "b", "c", 1))
                .await,
            Err(StoreError::Cast(_))
        ));
    }

    #[tokio::test]
    async fn missing_ids_return_none() {
        let store = InMemoryGameStore::new();
        assert_eq!(store.find_by_id(MISSING_ID).await.unwrap(), None);
        assert_eq!(
            store
                .find_by_id_and_update(MISSING_ID, fields("a", "b", "c", 1))
                .await
                .unwrap(),
            None
        );
        assert_eq!(store.find_by_id_and_delete(MISSING_ID).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_replaces_fields_and_keeps_id() {
        let store = InMemoryGameStore::new();
        let created = store.create(fields("Chrono", "RPG", "SNES", 1995)).await.unwrap();

        let updated = store
            .find_by_id_and_update(&created.id.to_hex(), fields("Chrono Cross", "RPG", "PS1", 1999))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.titulo, "Chrono Cross");
        assert_eq!(
            store.find_by_id(&created.id.to_hex()).await.unwrap(),
            Some(updated)
        );
    }

    #[tokio::test]
    async fn delete_returns_last_state_once() {
        let store = InMemoryGameStore::new();
        let created = store.create(fields("Chrono", "RPG", "SNES", 1995)).await.unwrap();
        let id = created.id.to_hex();

        assert_eq!(store.find_by_id_and_delete(&id).await.unwrap(), Some(created));
        assert_eq!(store.find_by_id_and_delete(&id).await.unwrap(), None);
        assert!(store.find(&GameFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_violations_are_reported_per_field() {
        let store = InMemoryGameStore::new();
        let error = store.create(fields("", "RPG", "", 1995)).await.unwrap_err();
        let StoreError::Validation(violations) = error else {
            panic!("expected validation error, got {error:?}");
        };
        assert_eq!(
            violations.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![FIELD_PLATFORM, FIELD_TITLE]
        );
    }

    #[tokio::test]
    async fn unique_fields_reject_duplicates_on_create_and_update() {
        let store = InMemoryGameStore::with_unique_fields(vec![FIELD_TITLE.to_string()]);
        let chrono = store.create(fields("Chrono", "RPG", "SNES", 1995)).await.unwrap();
        let doom = store.create(fields("Doom", "FPS", "PC", 1993)).await.unwrap();

        assert!(matches!(
            store.create(fields("Chrono", "RPG", "DS", 2008)).await,
            Err(StoreError::Duplicate { field }) if field == FIELD_TITLE
        ));
        assert!(matches!(
            store
                .find_by_id_and_update(&doom.id.to_hex(), fields("Chrono", "FPS", "PC", 1993))
                .await,
            Err(StoreError::Duplicate { field }) if field == FIELD_TITLE
        ));

        // Re-saving a record with its own value is not a conflict.
        let resaved = store
            .find_by_id_and_update(&chrono.id.to_hex(), fields("Chrono", "RPG", "SNES", 1995))
            .await
            .unwrap();
        assert_eq!(resaved, Some(chrono));
    }

    /// An update aimed at an id nobody holds misses, even when its values
    /// would collide with a unique field of another record.
    async fn assert_missing_update_ignores_conflicts(store: &dyn GameStore) {
        let chrono = store.create(fields("Chrono", "RPG", "SNES", 1995)).await.unwrap();
        assert_ne!(chrono.id.to_hex(), MISSING_ID);

        let outcome = store
            .find_by_id_and_update(MISSING_ID, fields("Chrono", "RPG", "SNES", 1995))
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(
            store.find_by_id(&chrono.id.to_hex()).await.unwrap(),
            Some(chrono)
        );
    }

    #[tokio::test]
    async fn memory_update_of_missing_id_wins_over_duplicate() {
        let store = InMemoryGameStore::with_unique_fields(vec![FIELD_TITLE.to_string()]);
        assert_missing_update_ignores_conflicts(&store).await;
    }

    /// Runs only against a local DynamoDB named by `DYNAMODB_ENDPOINT`.
    #[tokio::test]
    async fn dynamo_update_of_missing_id_wins_over_duplicate() {
        use aws_sdk_dynamodb::types::{
            AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType,
        };

        if std::env::var("DYNAMODB_ENDPOINT").is_err() {
            return;
        }
        let table_name = format!("games_test_{}", ObjectId::new());
        let store =
            DynamoGameStore::connect(table_name.clone(), vec![FIELD_TITLE.to_string()]).await;
        store
            .client
            .create_table()
            .table_name(&table_name)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(FIELD_ID)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .unwrap(),
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(FIELD_ID)
                    .key_type(KeyType::Hash)
                    .build()
                    .unwrap(),
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .unwrap();

        assert_missing_update_ignores_conflicts(&store).await;

        store
            .client
            .delete_table()
            .table_name(&table_name)
            .send()
            .await
            .unwrap();
    }

    #[test]
    fn dynamo_fields_drop_trailing_zero_from_integral_years() {
        let mut float_year = fields("Chrono", "RPG", "SNES", 0);
        float_year.lancamento = Number::from_f64(1995.0).unwrap();
        let stored = dynamo_fields(float_year);
        assert_eq!(stored.lancamento, Number::from(1995));

        let game = Game::new(ObjectId::new(), stored);
        let item = game_item(&game);
        assert_eq!(item[FIELD_RELEASE_YEAR], AttributeValue::N("1995".to_string()));
        assert_eq!(game_from_item(&item).unwrap(), game);

        let mut fractional = fields("Chrono", "RPG", "SNES", 0);
        fractional.lancamento = Number::from_f64(1995.5).unwrap();
        assert_eq!(
            dynamo_fields(fractional).lancamento,
            Number::from_f64(1995.5).unwrap()
        );
        assert_eq!(
            dynamo_fields(fields("Chrono", "RPG", "SNES", 1995)).lancamento,
            Number::from(1995)
        );
    }

    #[test]
    fn dynamo_item_round_trips_game() {
        let game = Game::new(
            ObjectId::parse_str("65300000aaaaaaaaaa000001").unwrap(),
            fields("Chrono", "RPG", "SNES", 1995),
        );
        let item = game_item(&game);
        assert_eq!(item[FIELD_RELEASE_YEAR], AttributeValue::N("1995".to_string()));
        assert_eq!(game_from_item(&item).unwrap(), game);
    }

    #[test]
    fn dynamo_item_without_required_attribute_is_rejected() {
        let game = Game::new(
            ObjectId::parse_str("65300000aaaaaaaaaa000001").unwrap(),
            fields("Chrono", "RPG", "SNES", 1995),
        );
        let mut item = game_item(&game);
        item.remove(FIELD_GENRE);
        let error = game_from_item(&item).unwrap_err();
        assert!(error.to_string().contains(FIELD_GENRE));
    }
}
