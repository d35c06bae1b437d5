use crate::calc::{self, MockTest, StudentRecord, MOCK_TEST_COUNT};
use rusqlite::Connection;

/// Repository seam between the ranking core and whatever holds the records.
/// Mutating operations follow a load-all, mutate, save-all lifecycle; the
/// collection is small enough that the full overwrite is the simple,
/// correct choice.
pub trait RecordStore {
    /// Fails soft: any read error yields an empty roster rather than a
    /// failure surfaced to the caller.
    fn load_all(&self) -> Vec<StudentRecord>;
    fn save_all(&self, records: &[StudentRecord]) -> anyhow::Result<()>;
}

pub struct SqliteRecords<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecords<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn try_load_all(&self) -> anyhow::Result<Vec<StudentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, student_class, phone, guardian_phone, school,
                    mock_test1, mock_test1_full,
                    mock_test2, mock_test2_full,
                    mock_test3, mock_test3_full,
                    mock_test4, mock_test4_full
             FROM students
             ORDER BY id",
        )?;
        let records = stmt
            .query_map([], |r| {
                let mut mocks = [MockTest::default(); MOCK_TEST_COUNT];
                for (i, mock) in mocks.iter_mut().enumerate() {
                    mock.score = r.get(6 + i * 2)?;
                    mock.out_of = r.get(7 + i * 2)?;
                }
                Ok(StudentRecord {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    student_class: r.get(2)?,
                    phone: r.get(3)?,
                    guardian_phone: r.get(4)?,
                    school: r.get(5)?,
                    // Derived fresh on every load.
                    percentage: 0.0,
                    mocks,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl RecordStore for SqliteRecords<'_> {
    fn load_all(&self) -> Vec<StudentRecord> {
        let mut records = self.try_load_all().unwrap_or_default();
        for record in &mut records {
            record.percentage = calc::percentage(&record.mocks);
        }
        records
    }

    fn save_all(&self, records: &[StudentRecord]) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM students", [])?;
        for record in records {
            tx.execute(
                "INSERT INTO students(
                   id, name, student_class, phone, guardian_phone, school,
                   mock_test1, mock_test1_full,
                   mock_test2, mock_test2_full,
                   mock_test3, mock_test3_full,
                   mock_test4, mock_test4_full,
                   updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    record.id,
                    record.name,
                    record.student_class,
                    record.phone,
                    record.guardian_phone,
                    record.school,
                    record.mocks[0].score,
                    record.mocks[0].out_of,
                    record.mocks[1].score,
                    record.mocks[1].out_of,
                    record.mocks[2].score,
                    record.mocks[2].out_of,
                    record.mocks[3].score,
                    record.mocks[3].out_of,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
