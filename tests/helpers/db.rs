use std::path::PathBuf;
use std::sync::Arc;

use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tempfile::{NamedTempFile, TempDir};
use warden::{DatabaseStore, FileStore, PolicyEngine};

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn store(&self) -> DatabaseStore {
        DatabaseStore::new(self.connection.clone(), None)
    }
}

/// Snapshot file in a temporary directory
pub struct TestSnapshot {
    dir: TempDir,
}

impl TestSnapshot {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("rbac.json")
    }

    pub async fn store(&self) -> FileStore {
        FileStore::open(self.path())
            .await
            .expect("Failed to open snapshot store")
    }
}

enum Backing {
    Db(TestDb),
    File(TestSnapshot),
}

/// A policy engine over a throwaway backend
pub struct TestEngine {
    pub engine: PolicyEngine,
    backing: Backing,
}

impl TestEngine {
    pub async fn database() -> Self {
        let db = TestDb::new().await;
        Self {
            engine: PolicyEngine::new(Arc::new(db.store())),
            backing: Backing::Db(db),
        }
    }

    pub async fn file() -> Self {
        let snapshot = TestSnapshot::new();
        Self {
            engine: PolicyEngine::new(Arc::new(snapshot.store().await)),
            backing: Backing::File(snapshot),
        }
    }

    /// One engine per backend, for properties that must hold on both.
    pub async fn all() -> Vec<Self> {
        vec![Self::database().await, Self::file().await]
    }

    pub fn with_default_roles(mut self, roles: &[&str]) -> Self {
        self.engine = self.engine.with_default_roles(roles.iter().copied());
        self
    }

    pub fn backend(&self) -> &'static str {
        self.engine.store().backend_name()
    }

    /// A second engine over the same storage, as a fresh process would see it.
    pub async fn reopen(&self) -> PolicyEngine {
        match &self.backing {
            Backing::Db(db) => PolicyEngine::new(Arc::new(db.store())),
            Backing::File(snapshot) => PolicyEngine::new(Arc::new(snapshot.store().await)),
        }
    }
}
