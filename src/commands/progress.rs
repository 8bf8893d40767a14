//! Inspect or reset the persisted cursor without connecting to Telegram

use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::{MessageId, ProgressStore};
use crate::state::resolve_begin;

pub fn run(config: &Config, set: Option<MessageId>) -> Result<()> {
    let store = ProgressStore::new(&config.progress_file);

    if let Some(cursor) = set {
        if cursor < 0 {
            return Err(Error::InvalidArgument(format!(
                "cursor must be non-negative, got {}",
                cursor
            )));
        }
        store.save(cursor)?;
        println!("Cursor set to {} in {}", cursor, store.path().display());
    }

    print!("{}", describe(config, store.load()));
    Ok(())
}

fn describe(config: &Config, cursor: MessageId) -> String {
    format!(
        "Progress file: {}\nLast forwarded: {}\nStart from (config): {}\nNext run begins at: {}\n",
        config.progress_file.display(),
        cursor,
        config.start_from_id,
        resolve_begin(config.start_from_id, cursor, false),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        let progress = dir.join("progress.json");
        let progress = progress.to_string_lossy().into_owned();
        Config::from_lookup(move |key| match key {
            "API_ID" => Some("1".into()),
            "SOURCE_CHANNEL" => Some("-1001".into()),
            "TARGET_CHANNEL" => Some("@target".into()),
            "PROGRESS_FILE" => Some(progress.clone()),
            _ => None,
        })
        .expect("config")
    }

    #[test]
    fn set_writes_cursor() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());

        run(&config, Some(50)).expect("run");

        assert_eq!(ProgressStore::new(&config.progress_file).load(), 50);
    }

    #[test]
    fn negative_cursor_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());
        assert!(matches!(
            run(&config, Some(-1)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn describe_reports_resume_point() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let text = describe(&config, 50);
        assert!(text.contains("Last forwarded: 50"));
        assert!(text.contains("Next run begins at: 51"));
    }
}
