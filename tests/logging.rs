// Failed operations are reported through `tracing` inside the store's span.
// Kept in its own test binary so no global subscriber competes with the
// thread-local one installed here.

use anyhow::Result;
use rust_datastore::{ColumnDefinition, DataType, Datastore, Entity, TableDefinition, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone)]
struct Note {
    id: i64,
    text: String,
}

impl Entity for Note {
    fn table() -> TableDefinition {
        TableDefinition::new("note")
            .with_column(ColumnDefinition::new("id", DataType::Integer).primary_key())
            .with_column(ColumnDefinition::new("text", DataType::Text))
    }

    fn to_values(&self) -> Vec<Value> {
        vec![self.id.into(), self.text.as_str().into()]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Note {
            id: row.get(0)?,
            text: row.get(1)?,
        })
    }
}

#[derive(Debug)]
struct Captured {
    level: Level,
    spans: Vec<String>,
    fields: HashMap<String, String>,
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<Captured>>>);

impl Capture {
    fn events(&self) -> Vec<Captured> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S> Layer<S> for Capture
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        let spans = ctx
            .event_scope(event)
            .map(|scope| scope.from_root().map(|span| span.name().to_string()).collect())
            .unwrap_or_default();
        self.0.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            spans,
            fields,
        });
    }
}

fn failure<'a>(events: &'a [Captured], operation: &str) -> Option<&'a Captured> {
    events
        .iter()
        .find(|e| e.fields.get("operation").map(String::as_str) == Some(operation))
}

#[tokio::test]
async fn test_failures_are_logged_in_injected_span() -> Result<()> {
    let capture = Capture::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let dir = tempfile::tempdir()?;
    let store = Datastore::<Note>::new(dir.path(), "notes")?
        .with_span(tracing::info_span!("notes_panel"));
    let note = Note {
        id: 1,
        text: "hello".to_string(),
    };

    // not open yet
    assert!(store.add(&note).await.is_err());
    let events = capture.events();
    let add = failure(&events, "add").expect("add failure was not logged");
    assert_eq!(add.level, Level::ERROR);
    assert_eq!(add.spans, vec!["notes_panel".to_string()]);
    assert!(add.fields["error"].contains("not open"));

    store.open().await?;
    capture.events();

    assert!(store.delete(&note).await.unwrap_err().is_not_found());
    let events = capture.events();
    let delete = failure(&events, "delete").expect("delete miss was not logged");
    assert_eq!(delete.level, Level::WARN);
    assert_eq!(delete.spans, vec!["notes_panel".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_default_span_names_the_store() -> Result<()> {
    let capture = Capture::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let dir = tempfile::tempdir()?;
    let store = Datastore::<Note>::new(dir.path(), "notes")?;
    assert!(store.count().await.is_err());

    let events = capture.events();
    let count = failure(&events, "count").expect("count failure was not logged");
    assert_eq!(count.level, Level::ERROR);
    assert_eq!(count.spans, vec!["datastore".to_string()]);

    // successful operations report no failure
    store.open().await?;
    store
        .add(&Note {
            id: 1,
            text: "hi".to_string(),
        })
        .await?;
    assert!(capture
        .events()
        .iter()
        .all(|e| !e.fields.contains_key("operation")));
    Ok(())
}
