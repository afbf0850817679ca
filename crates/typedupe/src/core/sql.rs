//! SQL batches produced by a [`SqlGenerator`](super::traits::SqlGenerator).
//!
//! A [`Sql`] is an ordered list of transactions, each an ordered list of
//! statements. Destinations that cannot run DDL inside a transaction use
//! [`Sql::separately`]; everything else uses [`Sql::transactionally`].
//!
//! Construction drops empty statements and empty transactions, so a `Sql`
//! never contains either.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Sql {
    transactions: Vec<Vec<String>>,
}

impl Sql {
    /// Build from raw transactions, dropping empty statements and transactions.
    pub fn create<T, S>(transactions: T) -> Self
    where
        T: IntoIterator,
        T::Item: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transactions = transactions
            .into_iter()
            .map(|tx| {
                tx.into_iter()
                    .map(Into::<String>::into)
                    .filter(|stmt| !stmt.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|tx| !tx.is_empty())
            .collect();
        Self { transactions }
    }

    /// A single statement in its own transaction.
    pub fn of(statement: impl Into<String>) -> Self {
        Self::transactionally([statement])
    }

    /// All statements in one transaction.
    pub fn transactionally<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::create([statements.into_iter().map(Into::into).collect::<Vec<String>>()])
    }

    /// Each statement in its own transaction.
    pub fn separately<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::create(statements.into_iter().map(|s| vec![Into::<String>::into(s)]))
    }

    /// Concatenate batches, preserving order.
    pub fn concat<I>(sqls: I) -> Self
    where
        I: IntoIterator<Item = Sql>,
    {
        Self {
            transactions: sqls.into_iter().flat_map(|s| s.transactions).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn transactions(&self) -> &[Vec<String>] {
        &self.transactions
    }

    pub fn into_transactions(self) -> Vec<Vec<String>> {
        self.transactions
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Render each transaction as one string.
    ///
    /// Single-statement transactions are emitted as-is. Longer ones are
    /// wrapped in `begin`/`commit`, one statement per line.
    pub fn as_sql_strings(&self, begin: &str, commit: &str) -> Vec<String> {
        self.transactions
            .iter()
            .map(|tx| {
                if tx.len() == 1 {
                    tx[0].clone()
                } else {
                    let mut out = format!("{};\n", begin);
                    for stmt in tx {
                        out.push_str(stmt);
                        out.push_str(";\n");
                    }
                    out.push_str(commit);
                    out
                }
            })
            .collect()
    }
}
