//! Pinmonl-DB: SQLite schema, migrations, and query operations.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - r2d2 connection pool management
//! - `models` - Row types for jobs, pinls, monls, and reports
//! - `queries` - Query functions, each taking a `&Connection`
//!
//! # Example
//!
//! ```no_run
//! use pinmonl_db::pool::{get_conn, init_pool};
//! use pinmonl_db::queries::monls;
//!
//! let pool = init_pool("/var/lib/pinmonl/pinmonl.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let (monl, created) = monls::find_or_create(&conn, "https://github.com/acme/widget").unwrap();
//! println!("monl {} (new: {})", monl.id, created);
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
