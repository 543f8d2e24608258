//! Typed views over the record and partner tables.

use std::path::Path;

use replay_core::{
    AuctionOutcome, AuctionRecord, AuctionTime, BidderId, Config, Error, LedgerEntry, NumericField,
    PartnerInfo, PartnerTable, Result,
};
use tracing::{debug, info, warn};

use crate::payload::has_payload;
use crate::table::{Cell, ColumnType, RawTable, TableWriter};

/// Auction records loaded from a source table.
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    /// Source table, all cells as text.
    pub table: RawTable,
    /// Records with a model payload, in source order.
    pub records: Vec<AuctionRecord>,
    /// Rows dropped for lacking a model payload.
    pub dropped_no_payload: usize,
}

/// Auction record source.
pub struct RecordSource;

impl RecordSource {
    /// Load and type the auction records in a CSV file.
    pub fn load(path: impl AsRef<Path>, config: &Config) -> Result<LoadedRecords> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading raw auction data");
        let table = RawTable::read_csv(path)?;
        Self::from_table(table, config)
    }

    /// Load every record of a CSV file, with or without a model payload.
    ///
    /// Used by analyses that read only the recorded outcome.
    pub fn load_all(path: impl AsRef<Path>, config: &Config) -> Result<LoadedRecords> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading raw auction data");
        let table = RawTable::read_csv(path)?;
        Self::from_table_all(table, config)
    }

    /// Type the rows of an already loaded table.
    ///
    /// Fails when a column the replay needs is absent. Rows without a model
    /// payload are dropped and counted.
    pub fn from_table(table: RawTable, config: &Config) -> Result<LoadedRecords> {
        Self::type_rows(table, config, true)
    }

    /// Type all rows of a table. The model output column is optional and no
    /// row is dropped.
    pub fn from_table_all(table: RawTable, config: &Config) -> Result<LoadedRecords> {
        Self::type_rows(table, config, false)
    }

    fn type_rows(table: RawTable, config: &Config, drop_without_payload: bool) -> Result<LoadedRecords> {
        let cols = &config.columns;
        let ts_col = table.require_column(&cols.timestamp, "Timestamp")?;
        let summary_col = table.require_column(&cols.summary, "Auction summary")?;
        let payload_col = if drop_without_payload {
            Some(table.require_column(&cols.model_output, "Model output")?)
        } else {
            table.column_index(&cols.model_output)
        };
        let winner_col = table.require_column(&cols.winner_id, "Winner id")?;
        let bid_col = table.require_column(&cols.winning_bid, "Winning bid")?;
        let lead_col = table.column_index(&cols.lead_id);

        let mut records = Vec::with_capacity(table.len());
        let mut dropped_no_payload = 0;
        let mut unparsed_times = 0;

        for row in 0..table.len() {
            let payload = payload_col.and_then(|c| table.cell(row, c));
            if drop_without_payload && !has_payload(payload) {
                debug!(source_index = row, "Dropping record without model payload");
                dropped_no_payload += 1;
                continue;
            }

            let timestamp = AuctionTime::parse(table.cell(row, ts_col).unwrap_or_default());
            if !timestamp.is_parsed() {
                unparsed_times += 1;
            }

            let original_winner_id = match table.cell(row, winner_col) {
                Some(text) => text.parse::<BidderId>().ok(),
                None => None,
            };

            records.push(AuctionRecord {
                source_index: row,
                timestamp,
                lead_id: lead_col.and_then(|c| table.cell(row, c)).map(str::to_string),
                original_winner_id,
                original_winning_bid: NumericField::from_text(table.cell(row, bid_col)),
                raw_summary: table.cell(row, summary_col).map(str::to_string),
                model_payload: payload.map(str::to_string),
            });
        }

        if unparsed_times > 0 {
            warn!(
                count = unparsed_times,
                column = %cols.timestamp,
                "Timestamps not recognized as datetimes; ordering them after parsed ones by text"
            );
        }
        if dropped_no_payload > 0 {
            info!(count = dropped_no_payload, "Dropped records without model payload");
        }

        Ok(LoadedRecords {
            table,
            records,
            dropped_no_payload,
        })
    }
}

/// Partner reference source.
pub struct PartnerSource;

impl PartnerSource {
    /// Load partner info from a CSV file.
    pub fn load(path: impl AsRef<Path>, config: &Config) -> Result<PartnerTable> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading partner info");
        let table = RawTable::read_csv(path)?;
        Self::from_table(&table, config)
    }

    /// Type the rows of a partner table.
    pub fn from_table(table: &RawTable, config: &Config) -> Result<PartnerTable> {
        let cols = &config.partners;
        let id_col = table.require_column(&cols.id, "Partner id")?;
        let cpa_col = table.require_column(&cols.target_cpa, "Target CPA")?;
        let budget_col = table.require_column(&cols.budget, "Budget")?;

        let mut partners = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let Some(bidder_id) = table.cell(row, id_col).and_then(|t| t.parse::<BidderId>().ok())
            else {
                warn!(row, "Skipping partner row with non-integer id");
                continue;
            };
            let target_cpa = NumericField::from_text(table.cell(row, cpa_col)).value();
            let initial_budget = NumericField::from_text(table.cell(row, budget_col)).value();
            if initial_budget.is_none() {
                debug!(%bidder_id, "Partner has no numeric budget and cannot win");
            }
            partners.push(PartnerInfo {
                bidder_id,
                target_cpa,
                initial_budget,
            });
        }

        info!(partners = partners.len(), "Loaded partner info");
        Ok(PartnerTable::new(partners))
    }
}

/// Write the input records in processed order with the result column appended.
///
/// The model payload column is left out of the output.
pub fn write_enriched(
    path: impl AsRef<Path>,
    table: &RawTable,
    outcomes: &[AuctionOutcome],
    config: &Config,
) -> Result<usize> {
    let skip = table.column_index(&config.columns.model_output);
    let kept: Vec<usize> = (0..table.columns.len()).filter(|&c| Some(c) != skip).collect();

    let mut columns: Vec<(String, ColumnType)> = kept
        .iter()
        .map(|&c| (table.columns[c].clone(), ColumnType::Text))
        .collect();
    columns.push((config.output.result_column.clone(), ColumnType::Text));

    let mut rows = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let mut row: Vec<Cell> = kept
            .iter()
            .map(|&c| Cell::Text(table.cell(outcome.source_index, c).map(str::to_string)))
            .collect();
        row.push(Cell::Text(Some(outcome.result_cell()?)));
        rows.push(row);
    }

    TableWriter::new(columns).write_csv(path, rows)
}

/// Write the final ledger as `PARTNER_ID, Remaining_Budget`, in the given order.
pub fn write_ledger(path: impl AsRef<Path>, entries: &[LedgerEntry]) -> Result<usize> {
    let writer = TableWriter::new(vec![
        ("PARTNER_ID".to_string(), ColumnType::BigInt),
        ("Remaining_Budget".to_string(), ColumnType::Double),
    ]);
    writer.write_csv(
        path,
        entries.iter().map(|e| {
            vec![
                Cell::BigInt(Some(e.partner_id.0)),
                Cell::Double(Some(e.remaining_budget)),
            ]
        }),
    )
}

/// Rows written by [`write_replay_outputs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenOutputs {
    pub analysis_rows: usize,
    pub ledger_rows: usize,
}

/// Write the enriched records and the final ledger together.
///
/// Both tables are staged next to their targets and only moved into place
/// once both were written. On failure neither target is touched.
pub fn write_replay_outputs(
    analysis_path: impl AsRef<Path>,
    ledger_path: impl AsRef<Path>,
    table: &RawTable,
    outcomes: &[AuctionOutcome],
    entries: &[LedgerEntry],
    config: &Config,
) -> Result<WrittenOutputs> {
    let analysis_path = analysis_path.as_ref();
    let ledger_path = ledger_path.as_ref();
    let analysis_stage = staging_path(analysis_path)?;
    let ledger_stage = staging_path(ledger_path)?;

    let staged = write_enriched(&analysis_stage, table, outcomes, config).and_then(|analysis_rows| {
        write_ledger(&ledger_stage, entries).map(|ledger_rows| WrittenOutputs {
            analysis_rows,
            ledger_rows,
        })
    });
    let written = match staged {
        Ok(written) => written,
        Err(e) => {
            let _ = std::fs::remove_file(&analysis_stage);
            let _ = std::fs::remove_file(&ledger_stage);
            return Err(e);
        }
    };

    std::fs::rename(&analysis_stage, analysis_path)?;
    std::fs::rename(&ledger_stage, ledger_path)?;
    debug!(
        analysis = %analysis_path.display(),
        ledger = %ledger_path.display(),
        "Committed replay outputs"
    );
    Ok(written)
}

fn staging_path(path: &Path) -> Result<std::path::PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::data(format!("output path {} has no file name", path.display())))?;
    Ok(path.with_file_name(format!(".{}.partial", name.to_string_lossy())))
}
