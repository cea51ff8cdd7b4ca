//! Keep-N-most-recent retention of stored backups.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{debug, info, instrument};

use crate::core::models::{BackupId, BackupRecord, DeviceId};
use crate::error::RetentionError;
use crate::rpc::Client;

pub const DEFAULT_KEEP: usize = 10;

/// Offsets written without a colon, which RFC 3339 parsing rejects.
const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

/// Naive formats the appliance has been seen to use, tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse an appliance timestamp. Zoned values are converted to UTC; naive
/// values are taken as they are.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    let zoned = DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .or_else(|| {
            ZONED_FORMATS
                .iter()
                .find_map(|fmt| DateTime::parse_from_str(value, fmt).ok())
        });
    if let Some(dt) = zoned {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Which backups of one device survive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionDecision {
    /// Newest first
    pub keep: Vec<BackupRecord>,
    /// Newest first
    pub prune: Vec<BackupRecord>,
}

impl RetentionDecision {
    pub fn prune_ids(&self) -> Vec<BackupId> {
        self.prune.iter().map(|r| r.id).collect()
    }
}

/// Split `records` into the `keep` most recent and the rest.
///
/// Records with equal timestamps keep their listing order. A single
/// unparsable timestamp fails the whole plan.
pub fn plan_retention(
    records: Vec<BackupRecord>,
    keep: usize,
) -> Result<RetentionDecision, RetentionError> {
    let mut ranked = records
        .into_iter()
        .map(|record| match parse_timestamp(&record.timestamp) {
            Some(ts) => Ok((ts, record)),
            None => Err(RetentionError::UnparsableTimestamp {
                backup_id: record.id,
                value: record.timestamp.clone(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    // sort_by is stable
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    let prune = ranked.split_off(keep.min(ranked.len()));
    Ok(RetentionDecision {
        keep: ranked.into_iter().map(|(_, r)| r).collect(),
        prune: prune.into_iter().map(|(_, r)| r).collect(),
    })
}

pub struct RetentionPruner {
    client: Client,
}

impl RetentionPruner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Delete all but the `keep` most recent backups of `device_id`.
    ///
    /// Returns the deleted ids. Nothing is sent to the appliance when there
    /// is nothing to delete.
    #[instrument(skip(self))]
    pub async fn prune(
        &self,
        device_id: DeviceId,
        keep: usize,
    ) -> Result<Vec<BackupId>, RetentionError> {
        let backups = self.client.device_backups(device_id).await?;
        let total = backups.len();
        let decision = plan_retention(backups, keep)?;

        let ids = decision.prune_ids();
        if ids.is_empty() {
            debug!(total, "Nothing to prune");
            return Ok(ids);
        }

        info!(total, pruned = ids.len(), ?ids, "Deleting backups");
        self.client.delete_backups(&ids).await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: BackupId, ts: &str) -> BackupRecord {
        BackupRecord {
            id,
            device_id: 1,
            timestamp: ts.to_string(),
            status: Some(true),
        }
    }

    fn ids(records: &[BackupRecord]) -> Vec<BackupId> {
        records.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_parse_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();

        assert_eq!(parse_timestamp("2024-03-01 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T11:30:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("01/03/2024 10:30:00"), Some(expected));
        assert!(parse_timestamp("2024-03-01 10:30:00.250").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_parse_without_seconds() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();

        assert_eq!(parse_timestamp("2024-03-01 10:30"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:30"), Some(expected));
    }

    #[test]
    fn test_parse_offset_without_colon() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_milli_opt(9, 30, 0, 500)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-01T10:30:00.5+0100"), Some(expected));

        let utc = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-01 10:30:00 +0000"), Some(utc));
        assert_eq!(parse_timestamp("2024-03-01 12:30:00+0200"), Some(utc));
    }

    #[test]
    fn test_parse_rfc2822() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();

        assert_eq!(parse_timestamp("Fri, 01 Mar 2024 10:30:00 GMT"), Some(expected));
        assert_eq!(parse_timestamp("Fri, 01 Mar 2024 11:30:00 +0100"), Some(expected));
    }

    #[test]
    fn test_keeps_most_recent() {
        let records = vec![
            record(1, "2024-01-01 00:00:00"),
            record(2, "2024-03-01 00:00:00"),
            record(3, "2024-02-01 00:00:00"),
            record(4, "2023-12-01 00:00:00"),
        ];

        let decision = plan_retention(records, 2).unwrap();
        assert_eq!(ids(&decision.keep), vec![2, 3]);
        assert_eq!(ids(&decision.prune), vec![1, 4]);
    }

    #[test]
    fn test_equal_timestamps_keep_listing_order() {
        let records = vec![
            record(1, "2024-01-01 00:00:00"),
            record(2, "2024-02-01 00:00:00"),
            record(3, "2024-02-01 00:00:00"),
            record(4, "2024-02-01 00:00:00"),
        ];

        let decision = plan_retention(records, 2).unwrap();
        assert_eq!(ids(&decision.keep), vec![2, 3]);
        assert_eq!(ids(&decision.prune), vec![4, 1]);
    }

    #[test]
    fn test_deleted_count_matches_overflow() {
        for len in 0..6usize {
            for keep in 0..6 {
                let records: Vec<_> = (0..len)
                    .map(|i| record(i as BackupId, &format!("2024-01-{:02} 00:00:00", i + 1)))
                    .collect();
                let decision = plan_retention(records, keep).unwrap();
                assert_eq!(decision.prune.len(), len.saturating_sub(keep));
                assert_eq!(decision.keep.len(), len.min(keep));
            }
        }
    }

    #[test]
    fn test_unparsable_timestamp_is_an_error() {
        let records = vec![record(1, "2024-01-01 00:00:00"), record(2, "garbage")];

        let err = plan_retention(records, 10).unwrap_err();
        assert!(matches!(
            err,
            RetentionError::UnparsableTimestamp { backup_id: 2, ref value } if value == "garbage"
        ));
    }
}
