use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};

use super::{validate_patient_id, DoctorContact, Patient, PatientRepository};

const COLUMNS: &str = "patient_id, first_name, last_name, date_of_birth, gender, email, \
     phone, address, emergency_contact_name, emergency_contact_phone, medical_history, \
     current_medications, allergies, previous_kidney_stones, registration_date, \
     last_scan_date, total_scans";

pub struct SqlitePatientRepository {
    conn: Connection,
}

impl SqlitePatientRepository {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open patient db {}", db_path))?;
        let mut repo = Self { conn };
        repo.ensure_schema()?;
        Ok(repo)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut repo = Self {
            conn: Connection::open_in_memory()?,
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS patients (
              patient_id TEXT PRIMARY KEY,
              first_name TEXT NOT NULL,
              last_name TEXT NOT NULL,
              date_of_birth TEXT,
              gender TEXT,
              email TEXT NOT NULL,
              phone TEXT,
              address TEXT,
              emergency_contact_name TEXT,
              emergency_contact_phone TEXT,
              medical_history TEXT,
              current_medications TEXT,
              allergies TEXT,
              previous_kidney_stones INTEGER NOT NULL DEFAULT 0,
              registration_date TEXT NOT NULL,
              last_scan_date TEXT,
              total_scans INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_email
              ON patients(email COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS doctor_contacts (
              patient_id TEXT PRIMARY KEY REFERENCES patients(patient_id),
              doctor_phone TEXT,
              doctor_email TEXT,
              updated_date TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn query(&self, sql_where: &str, arg: &str) -> Result<Vec<Patient>> {
        let sql = format!(
            "SELECT {} FROM patients {} ORDER BY patient_id",
            COLUMNS, sql_where
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if sql_where.is_empty() {
            stmt.query_map([], raw_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([arg], raw_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter().map(RawPatient::into_patient).collect()
    }
}

/// Column values as stored, before date parsing.
struct RawPatient {
    patient_id: String,
    first_name: String,
    last_name: String,
    date_of_birth: Option<String>,
    gender: Option<String>,
    email: String,
    phone: Option<String>,
    address: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
    medical_history: Option<String>,
    current_medications: Option<String>,
    allergies: Option<String>,
    previous_kidney_stones: bool,
    registration_date: String,
    last_scan_date: Option<String>,
    total_scans: u32,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawPatient> {
    Ok(RawPatient {
        patient_id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        date_of_birth: row.get(3)?,
        gender: row.get(4)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        address: row.get(7)?,
        emergency_contact_name: row.get(8)?,
        emergency_contact_phone: row.get(9)?,
        medical_history: row.get(10)?,
        current_medications: row.get(11)?,
        allergies: row.get(12)?,
        previous_kidney_stones: row.get(13)?,
        registration_date: row.get(14)?,
        last_scan_date: row.get(15)?,
        total_scans: row.get(16)?,
    })
}

impl RawPatient {
    fn into_patient(self) -> Result<Patient> {
        let date_of_birth = self
            .date_of_birth
            .as_deref()
            .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
            .transpose()
            .map_err(|e| anyhow!("corrupt date_of_birth for {}: {}", self.patient_id, e))?;
        let registration_date = parse_timestamp(&self.registration_date)
            .with_context(|| format!("corrupt registration_date for {}", self.patient_id))?;
        let last_scan_date = self
            .last_scan_date
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .with_context(|| format!("corrupt last_scan_date for {}", self.patient_id))?;
        Ok(Patient {
            patient_id: self.patient_id,
            first_name: self.first_name,
            last_name: self.last_name,
            date_of_birth,
            gender: self.gender,
            email: self.email,
            phone: self.phone,
            address: self.address,
            emergency_contact_name: self.emergency_contact_name,
            emergency_contact_phone: self.emergency_contact_phone,
            medical_history: self.medical_history,
            current_medications: self.current_medications,
            allergies: self.allergies,
            previous_kidney_stones: self.previous_kidney_stones,
            registration_date,
            last_scan_date,
            total_scans: self.total_scans,
        })
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

impl PatientRepository for SqlitePatientRepository {
    fn save(&mut self, p: &Patient) -> Result<()> {
        validate_patient_id(&p.patient_id)?;
        let sql = format!(
            "INSERT INTO patients ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            COLUMNS
        );
        self.conn
            .execute(
                &sql,
                params![
                    p.patient_id,
                    p.first_name,
                    p.last_name,
                    p.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
                    p.gender,
                    p.email,
                    p.phone,
                    p.address,
                    p.emergency_contact_name,
                    p.emergency_contact_phone,
                    p.medical_history,
                    p.current_medications,
                    p.allergies,
                    p.previous_kidney_stones,
                    timestamp(&p.registration_date),
                    p.last_scan_date.as_ref().map(timestamp),
                    p.total_scans,
                ],
            )
            .with_context(|| format!("failed to insert patient {}", p.patient_id))?;
        Ok(())
    }

    fn find_by_id(&mut self, patient_id: &str) -> Result<Option<Patient>> {
        Ok(self
            .query("WHERE patient_id = ?1", patient_id)?
            .into_iter()
            .next())
    }

    fn find_by_email(&mut self, email: &str) -> Result<Option<Patient>> {
        Ok(self
            .query("WHERE email = ?1 COLLATE NOCASE", email.trim())?
            .into_iter()
            .next())
    }

    fn search(&mut self, term: &str) -> Result<Vec<Patient>> {
        // Filtered in Rust so matching is identical to the in-memory store.
        Ok(self
            .query("", "")?
            .into_iter()
            .filter(|p| p.matches(term))
            .collect())
    }

    fn record_scan(&mut self, patient_id: &str, at: DateTime<Utc>) -> Result<Patient> {
        let updated = self.conn.execute(
            "UPDATE patients SET last_scan_date = ?1, total_scans = total_scans + 1 WHERE patient_id = ?2",
            params![timestamp(&at), patient_id],
        )?;
        if updated == 0 {
            return Err(anyhow!("unknown patient {}", patient_id));
        }
        self.find_by_id(patient_id)?
            .ok_or_else(|| anyhow!("unknown patient {}", patient_id))
    }

    fn list(&mut self) -> Result<Vec<Patient>> {
        self.query("", "")
    }

    fn save_doctor_contact(&mut self, patient_id: &str, contact: &DoctorContact) -> Result<()> {
        contact.validate()?;
        if self.find_by_id(patient_id)?.is_none() {
            return Err(anyhow!("unknown patient {}", patient_id));
        }
        self.conn
            .execute(
                "INSERT INTO doctor_contacts (patient_id, doctor_phone, doctor_email, updated_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(patient_id) DO UPDATE SET
                   doctor_phone = excluded.doctor_phone,
                   doctor_email = excluded.doctor_email,
                   updated_date = excluded.updated_date",
                params![
                    patient_id,
                    contact.phone,
                    contact.email,
                    contact.updated.format("%Y-%m-%d").to_string(),
                ],
            )
            .with_context(|| format!("failed to save doctor contact for {}", patient_id))?;
        Ok(())
    }

    fn doctor_contact(&mut self, patient_id: &str) -> Result<Option<DoctorContact>> {
        let mut stmt = self.conn.prepare(
            "SELECT doctor_phone, doctor_email, updated_date FROM doctor_contacts WHERE patient_id = ?1",
        )?;
        let mut rows = stmt.query_map([patient_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let (phone, email, updated) = row?;
        let updated = NaiveDate::parse_from_str(&updated, "%Y-%m-%d")
            .map_err(|e| anyhow!("corrupt doctor contact date for {}: {}", patient_id, e))?;
        Ok(Some(DoctorContact {
            phone,
            email,
            updated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patients::{register_patient, NewPatient};
    use chrono::TimeZone;

    #[test]
    fn stores_and_reloads_every_field() -> Result<()> {
        let mut repo = SqlitePatientRepository::open_in_memory()?;
        let now = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();
        let form = NewPatient {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: "grace@navy.mil".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 12, 9),
            phone: Some("555-010-9999".into()),
            allergies: Some("penicillin".into()),
            previous_kidney_stones: true,
            ..Default::default()
        };
        let saved = register_patient(&mut repo, form, now)?;
        let loaded = repo.find_by_id(&saved.patient_id)?.expect("stored patient");
        assert_eq!(loaded, saved);
        assert_eq!(loaded.age_on(now.date_naive()), Some(45));
        Ok(())
    }
}
