//! Importer runs from a converted intermediate store into a SQLite destination.

use std::path::PathBuf;
use std::time::Duration;

use discourse_migrate::converters::{ConverterRunner, RunStats, RunnerOptions, CONVERTER_STEPS};
use discourse_migrate::database::{migrate, IntermediateStore, SchemaKind};
use discourse_migrate::error::{Error, Result};
use discourse_migrate::importer::{
    select_steps, ImportDb, ImportRecord, ImportRunner, ImporterOptions, ImporterStep,
    MappingTable, MappingType, SqliteDestination, StepDescriptor, TransformContext,
};
use discourse_migrate::progress::NoProgress;
use discourse_migrate::uploads::{MaterializeOptions, UploadMaterializer};
use discourse_migrate::value::{Row, SqlValue};
use rusqlite::Connection;

mod common;

use common::{forum_fixture, Fixture};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Pipeline {
    fixture: Fixture,
    intermediate: PathBuf,
    mappings: PathBuf,
    uploads: PathBuf,
    destination: PathBuf,
}

impl Pipeline {
    /// Convert the forum fixture and materialize its uploads.
    async fn converted() -> Self {
        let fixture = forum_fixture();
        let root = fixture.dir.path().to_path_buf();
        let pipeline = Self {
            intermediate: root.join("intermediate.db"),
            mappings: root.join("mappings.db"),
            uploads: root.join("uploads.db"),
            destination: root.join("discourse.db"),
            fixture,
        };

        let (mut store, _) = IntermediateStore::open(&pipeline.intermediate, TIMEOUT).unwrap();
        let options = RunnerOptions {
            workers: 0,
            batch_size: 2,
            worker_command: None,
        };
        let mut runner =
            ConverterRunner::new(&mut store, pipeline.fixture.settings.clone(), options);
        for step in CONVERTER_STEPS {
            runner.run_step(step, &mut NoProgress).await.unwrap();
        }

        UploadMaterializer::open(
            &pipeline.uploads,
            &pipeline.intermediate,
            MaterializeOptions {
                uploads_dir: root.join("uploads"),
                max_size: 1024,
            },
            TIMEOUT,
        )
        .unwrap()
        .run(&mut NoProgress)
        .unwrap();

        migrate(&pipeline.destination, &SchemaKind::Destination.into(), TIMEOUT).unwrap();
        pipeline
    }

    fn import(&self, steps: Vec<Box<dyn ImporterStep>>) -> Result<Vec<(&'static str, RunStats)>> {
        let db = ImportDb::open(
            &self.mappings,
            &self.intermediate,
            Some(&self.uploads),
            TIMEOUT,
        )?;
        let mut mappings = MappingTable::open(&self.mappings, TIMEOUT)?;
        let mut destination = SqliteDestination::open(&self.destination, TIMEOUT)?;
        let mut runner = ImportRunner::new(
            &db,
            &mut mappings,
            &mut destination,
            ImporterOptions { batch_size: 2 },
        );
        runner.run(steps, &mut NoProgress)
    }

    fn destination_count(&self, table: &str) -> i64 {
        let conn = Connection::open(&self.destination).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    fn mapped(&self, mapping_type: MappingType, original_id: &str) -> Option<i64> {
        MappingTable::open(&self.mappings, TIMEOUT)
            .unwrap()
            .get(mapping_type, original_id)
            .unwrap()
    }

    fn staged_sha(&self, upload_id: &str) -> String {
        let conn = Connection::open(&self.intermediate).unwrap();
        conn.query_row("SELECT sha256 FROM uploads WHERE id = ?1", [upload_id], |r| r.get(0))
            .unwrap()
    }
}

fn stats_for<'a>(results: &'a [(&'static str, RunStats)], step: &str) -> &'a RunStats {
    &results
        .iter()
        .find(|(name, _)| *name == step)
        .unwrap_or_else(|| panic!("{} did not run", step))
        .1
}

#[tokio::test]
async fn test_full_import_in_dependency_order() {
    let pipeline = Pipeline::converted().await;
    let results = pipeline.import(select_steps(&[]).unwrap()).unwrap();

    let order: Vec<&str> = results.iter().map(|(name, _)| *name).collect();
    assert_eq!(order, vec!["users", "uploads", "tag_groups", "tags", "site_settings"]);
    for (name, stats) in &results {
        assert_eq!(stats.error_count, 0, "{}: {:?}", name, stats.errors);
    }

    assert_eq!(pipeline.destination_count("users"), 2);
    assert_eq!(pipeline.destination_count("uploads"), 2);
    assert_eq!(pipeline.destination_count("tag_groups"), 2);
    assert_eq!(pipeline.destination_count("tags"), 3);
    assert_eq!(pipeline.destination_count("site_settings"), 3);

    // The logo setting points at the destination id of upload 10.
    let logo_upload = pipeline.mapped(MappingType::Uploads, "10").unwrap();
    let conn = Connection::open(&pipeline.destination).unwrap();
    let logo: String = conn
        .query_row("SELECT value FROM site_settings WHERE name = 'logo'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(logo, logo_upload.to_string());

    // Upload owners are resolved through the users mapping.
    let bob = pipeline.mapped(MappingType::Users, "3").unwrap();
    let owner: i64 = conn
        .query_row(
            "SELECT user_id FROM uploads WHERE original_filename = 'notes.txt'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(owner, bob);
}

#[tokio::test]
async fn test_second_run_inserts_nothing() {
    let pipeline = Pipeline::converted().await;
    pipeline.import(select_steps(&[]).unwrap()).unwrap();
    let before: Vec<i64> = ["users", "uploads", "tag_groups", "tags", "site_settings"]
        .iter()
        .map(|t| pipeline.destination_count(t))
        .collect();

    let results = pipeline.import(select_steps(&[]).unwrap()).unwrap();

    for (name, stats) in &results {
        assert_eq!(stats.processed_count, 0, "{} saw rows again", name);
    }
    let after: Vec<i64> = ["users", "uploads", "tag_groups", "tags", "site_settings"]
        .iter()
        .map(|t| pipeline.destination_count(t))
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_existing_hash_is_skipped_without_mapping() {
    let pipeline = Pipeline::converted().await;
    let logo_sha = pipeline.staged_sha("10");
    Connection::open(&pipeline.destination)
        .unwrap()
        .execute(
            "INSERT INTO uploads (user_id, original_filename, sha256, filesize, url) \
             VALUES (-1, 'existing.png', ?1, 12, '/uploads/existing.png')",
            [&logo_sha],
        )
        .unwrap();

    let results = pipeline.import(select_steps(&["site_settings".to_string()]).unwrap()).unwrap();

    let uploads = stats_for(&results, "uploads");
    assert_eq!(uploads.processed_count, 2);
    assert_eq!(uploads.skipped_count, 1);
    assert_eq!(uploads.error_count, 0);
    assert_eq!(pipeline.mapped(MappingType::Uploads, "10"), None);
    assert!(pipeline.mapped(MappingType::Uploads, "11").is_some());
    assert_eq!(pipeline.destination_count("uploads"), 2);

    // The setting that referenced the skipped upload has nothing to point at.
    let settings = stats_for(&results, "site_settings");
    assert_eq!(settings.error_count, 1);
    assert_eq!(
        settings.errors[0].message,
        "upload 10 for setting 'logo' was not imported"
    );
}

#[tokio::test]
async fn test_oversized_upload_is_never_imported() {
    let fixture = forum_fixture();
    let root = fixture.dir.path().to_path_buf();
    let intermediate = root.join("intermediate.db");
    let (mut store, _) = IntermediateStore::open(&intermediate, TIMEOUT).unwrap();
    let options = RunnerOptions {
        workers: 0,
        batch_size: 10,
        worker_command: None,
    };
    ConverterRunner::new(&mut store, fixture.settings.clone(), options)
        .run_step("uploads", &mut NoProgress)
        .await
        .unwrap();

    // Both fixture uploads are larger than four bytes.
    let uploads = root.join("uploads.db");
    let stats = UploadMaterializer::open(
        &uploads,
        &intermediate,
        MaterializeOptions {
            uploads_dir: root.join("uploads"),
            max_size: 4,
        },
        TIMEOUT,
    )
    .unwrap()
    .run(&mut NoProgress)
    .unwrap();
    assert_eq!(stats.skipped_count, 2);

    let destination = root.join("discourse.db");
    migrate(&destination, &SchemaKind::Destination.into(), TIMEOUT).unwrap();
    let mappings = root.join("mappings.db");
    let db = ImportDb::open(&mappings, &intermediate, Some(&uploads), TIMEOUT).unwrap();
    let mut table = MappingTable::open(&mappings, TIMEOUT).unwrap();
    let mut dest = SqliteDestination::open(&destination, TIMEOUT).unwrap();
    let results = ImportRunner::new(&db, &mut table, &mut dest, ImporterOptions::default())
        .run(select_steps(&["uploads".to_string()]).unwrap(), &mut NoProgress)
        .unwrap();

    assert_eq!(stats_for(&results, "uploads").processed_count, 0);
}

/// Tag groups, slowly.
struct SlowGroups;

impl ImporterStep for SlowGroups {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: "slow_groups",
            table: "tag_groups",
            column_names: &["name"],
            depends_on: &[],
            store_mapped_ids: Some(MappingType::TagGroups),
        }
    }

    fn total_rows_query(&self) -> String {
        "SELECT COUNT(*) FROM src.tag_groups".to_string()
    }

    fn rows_query(&self) -> String {
        "SELECT original_id, name FROM src.tag_groups ORDER BY original_id".to_string()
    }

    fn transform_row(
        &mut self,
        row: &Row,
        _ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        std::thread::sleep(Duration::from_millis(20));
        Ok(Some(ImportRecord::new(
            row.text("original_id").unwrap(),
            vec![row.get("name").cloned().unwrap_or(SqlValue::Null)],
        )))
    }
}

/// Tags that insist on their group's mapping being present.
struct GroupedTags {
    missing: Vec<String>,
}

impl ImporterStep for GroupedTags {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: "grouped_tags",
            table: "tags",
            column_names: &["name", "tag_group_id"],
            depends_on: &["slow_groups"],
            store_mapped_ids: Some(MappingType::Tags),
        }
    }

    fn total_rows_query(&self) -> String {
        "SELECT COUNT(*) FROM src.tags".to_string()
    }

    fn rows_query(&self) -> String {
        "SELECT original_id, name, tag_group_id FROM src.tags ORDER BY original_id".to_string()
    }

    fn transform_row(
        &mut self,
        row: &Row,
        ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        let group = row.text("tag_group_id").unwrap();
        let Some(group_id) = ctx.destination_id(MappingType::TagGroups, &group)? else {
            self.missing.push(group.clone());
            anyhow::bail!("group {} not mapped yet", group);
        };
        Ok(Some(ImportRecord::new(
            row.text("original_id").unwrap(),
            vec![
                row.get("name").cloned().unwrap_or(SqlValue::Null),
                group_id.into(),
            ],
        )))
    }
}

#[tokio::test]
async fn test_dependent_step_never_sees_missing_mapping() {
    let pipeline = Pipeline::converted().await;

    // Dependent first; the runner has to reorder.
    let steps: Vec<Box<dyn ImporterStep>> = vec![
        Box::new(GroupedTags {
            missing: Vec::new(),
        }),
        Box::new(SlowGroups),
    ];
    let results = pipeline.import(steps).unwrap();

    let order: Vec<&str> = results.iter().map(|(name, _)| *name).collect();
    assert_eq!(order, vec!["slow_groups", "grouped_tags"]);
    let tags = stats_for(&results, "grouped_tags");
    assert_eq!(tags.processed_count, 3);
    assert_eq!(tags.error_count, 0, "{:?}", tags.errors);
}

/// A step that depends on whatever it is told to.
struct Needs {
    name: &'static str,
    depends_on: &'static [&'static str],
}

impl ImporterStep for Needs {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: self.name,
            table: "tag_groups",
            column_names: &["name"],
            depends_on: self.depends_on,
            store_mapped_ids: None,
        }
    }

    fn total_rows_query(&self) -> String {
        "SELECT COUNT(*) FROM src.tag_groups".to_string()
    }

    fn rows_query(&self) -> String {
        "SELECT name FROM src.tag_groups".to_string()
    }

    fn transform_row(
        &mut self,
        row: &Row,
        _ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        Ok(Some(ImportRecord {
            original_id: None,
            values: vec![row.get("name").cloned().unwrap_or(SqlValue::Null)],
            claims: Vec::new(),
        }))
    }
}

#[tokio::test]
async fn test_cycle_fails_before_any_step_runs() {
    let pipeline = Pipeline::converted().await;
    let steps: Vec<Box<dyn ImporterStep>> = vec![
        Box::new(Needs {
            name: "first",
            depends_on: &["second"],
        }),
        Box::new(Needs {
            name: "second",
            depends_on: &["first"],
        }),
    ];

    let err = pipeline.import(steps).unwrap_err();
    assert!(matches!(err, Error::DependencyCycle(_)), "{}", err);
    assert_eq!(pipeline.destination_count("tag_groups"), 0);
}

#[tokio::test]
async fn test_unknown_dependency_fails_before_any_step_runs() {
    let pipeline = Pipeline::converted().await;
    let steps: Vec<Box<dyn ImporterStep>> = vec![
        Box::new(Needs {
            name: "first",
            depends_on: &[],
        }),
        Box::new(Needs {
            name: "second",
            depends_on: &["posts"],
        }),
    ];

    let err = pipeline.import(steps).unwrap_err();
    assert!(matches!(err, Error::UnknownDependency { .. }), "{}", err);
    assert_eq!(pipeline.destination_count("tag_groups"), 0);
}

#[test]
fn test_selecting_a_step_pulls_in_its_dependencies() {
    let names: Vec<&str> = select_steps(&["tags".to_string()])
        .unwrap()
        .iter()
        .map(|s| s.descriptor().name)
        .collect();
    assert_eq!(names, vec!["tag_groups", "tags"]);

    let names: Vec<&str> = select_steps(&["site_settings".to_string()])
        .unwrap()
        .iter()
        .map(|s| s.descriptor().name)
        .collect();
    assert_eq!(names, vec!["users", "uploads", "site_settings"]);
}
