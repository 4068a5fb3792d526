use log::{error, warn};
use std::future::Future;
use storefront_core::{CodeGenerator, CodeKind, MAX_CODE_ATTEMPTS};

use super::Error;
use crate::infra::db::{is_unique_violation_on, DatabaseWriteError};

/// Insert a row keyed by a freshly generated code, drawing a new code whenever
/// the insert trips the unique constraint on `column`. The constraint is the
/// only guard against concurrent writers picking the same code.
pub(crate) async fn insert_with_unique_code<T, F, Fut>(
    codes: &dyn CodeGenerator,
    kind: CodeKind,
    seed: Option<&str>,
    column: &str,
    mut insert: F,
) -> Result<T, Error>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, DatabaseWriteError>>,
{
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = codes.generate(kind, seed);
        match insert(code.clone()).await {
            Ok(row) => return Ok(row),
            Err(DatabaseWriteError::Sqlx(e)) if is_unique_violation_on(&e, column) => {
                warn!(
                    "{} code {} already taken, attempt {}/{}",
                    kind, code, attempt, MAX_CODE_ATTEMPTS
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    error!(
        "gave up allocating a {} code after {} collisions on {}, check the code generator",
        kind, MAX_CODE_ATTEMPTS, column
    );
    Err(Error::CodeExhausted {
        kind,
        attempts: MAX_CODE_ATTEMPTS,
    })
}
