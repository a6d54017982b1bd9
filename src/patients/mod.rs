//! Patient records and where they are kept.

mod sqlite;

pub use sqlite::SqlitePatientRepository;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const PATIENT_ID_PREFIX: &str = "PT-";
pub const MIN_PHONE_DIGITS: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub medical_history: Option<String>,
    pub current_medications: Option<String>,
    pub allergies: Option<String>,
    pub previous_kidney_stones: bool,
    pub registration_date: DateTime<Utc>,
    pub last_scan_date: Option<DateTime<Utc>>,
    pub total_scans: u32,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Age in whole years on `on`, when the date of birth is known.
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        self.date_of_birth.and_then(|dob| age_on(dob, on))
    }

    pub fn age(&self) -> Option<u32> {
        self.age_on(Utc::now().date_naive())
    }

    /// Case-insensitive substring match on names, email and id.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        [
            &self.first_name,
            &self.last_name,
            &self.email,
            &self.patient_id,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&term))
    }
}

/// Registration form for a new patient.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewPatient {
    /// Generated when absent.
    pub patient_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub medical_history: Option<String>,
    pub current_medications: Option<String>,
    pub allergies: Option<String>,
    pub previous_kidney_stones: bool,
}

/// The patient's own doctor, kept alongside the patient record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoctorContact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub updated: NaiveDate,
}

impl DoctorContact {
    pub fn new(phone: Option<String>, email: Option<String>, updated: NaiveDate) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            phone: clean(phone),
            email: clean(email),
            updated,
        }
    }

    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.phone.is_none() && self.email.is_none() {
            errors.push("Doctor phone or email is required".to_string());
        }
        if let Some(phone) = &self.phone {
            if phone_digits(phone) < MIN_PHONE_DIGITS {
                errors.push("Please enter a valid doctor phone number".to_string());
            }
        }
        if let Some(email) = &self.email {
            if !email_re().is_match(email) {
                errors.push("Please enter a valid doctor email address".to_string());
            }
        }
        errors
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.validation_errors();
        if !errors.is_empty() {
            return Err(anyhow!("invalid doctor contact: {}", errors.join("; ")));
        }
        Ok(())
    }
}

fn email_re() -> &'static regex::Regex {
    static EMAIL_RE: OnceLock<regex::Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| regex::Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap())
}

fn patient_id_re() -> &'static regex::Regex {
    static PATIENT_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    PATIENT_ID_RE.get_or_init(|| regex::Regex::new(r"^PT-[0-9A-F]{8}$").unwrap())
}

pub fn validate_patient_id(id: &str) -> Result<()> {
    if !patient_id_re().is_match(id) {
        return Err(anyhow!("invalid patient id '{}': expected PT-XXXXXXXX", id));
    }
    Ok(())
}

/// `PT-` followed by eight upper-case hex digits.
pub fn generate_patient_id() -> String {
    let n: u32 = rand::thread_rng().gen();
    format!("{}{:08X}", PATIENT_ID_PREFIX, n)
}

/// Whole years between `dob` and `on`; `None` for dates in the future.
pub fn age_on(dob: NaiveDate, on: NaiveDate) -> Option<u32> {
    if dob > on {
        return None;
    }
    let mut years = on.year() - dob.year();
    if (on.month(), on.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

fn phone_digits(phone: &str) -> usize {
    phone
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '(' | ')'))
        .filter(|c| c.is_ascii_digit())
        .count()
}

impl NewPatient {
    /// Every problem with the form, in field order. Empty when valid.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.first_name.trim().is_empty() {
            errors.push("First Name is required".to_string());
        }
        if self.last_name.trim().is_empty() {
            errors.push("Last Name is required".to_string());
        }
        let email = self.email.trim();
        if email.is_empty() {
            errors.push("Email is required".to_string());
        } else if !email_re().is_match(email) {
            errors.push("Please enter a valid email address".to_string());
        }
        if let Some(phone) = self.phone.as_deref().filter(|p| !p.trim().is_empty()) {
            if phone_digits(phone) < MIN_PHONE_DIGITS {
                errors.push("Please enter a valid phone number".to_string());
            }
        }
        if let Some(id) = &self.patient_id {
            if !patient_id_re().is_match(id) {
                errors.push("Patient ID must look like PT-XXXXXXXX".to_string());
            }
        }
        errors
    }

    /// Validate and turn the form into a stored record.
    pub fn register(self, now: DateTime<Utc>) -> Result<Patient> {
        let errors = self.validation_errors();
        if !errors.is_empty() {
            return Err(anyhow!("invalid patient: {}", errors.join("; ")));
        }
        Ok(Patient {
            patient_id: self.patient_id.unwrap_or_else(generate_patient_id),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            email: self.email.trim().to_string(),
            phone: self.phone,
            address: self.address,
            emergency_contact_name: self.emergency_contact_name,
            emergency_contact_phone: self.emergency_contact_phone,
            medical_history: self.medical_history,
            current_medications: self.current_medications,
            allergies: self.allergies,
            previous_kidney_stones: self.previous_kidney_stones,
            registration_date: now,
            last_scan_date: None,
            total_scans: 0,
        })
    }
}

pub trait PatientRepository {
    /// Insert a new patient. Fails if the id or email is already taken.
    fn save(&mut self, patient: &Patient) -> Result<()>;

    fn find_by_id(&mut self, patient_id: &str) -> Result<Option<Patient>>;

    /// Case-insensitive email lookup.
    fn find_by_email(&mut self, email: &str) -> Result<Option<Patient>>;

    fn search(&mut self, term: &str) -> Result<Vec<Patient>>;

    /// Stamp a completed scan and bump the scan count.
    fn record_scan(&mut self, patient_id: &str, at: DateTime<Utc>) -> Result<Patient>;

    fn list(&mut self) -> Result<Vec<Patient>>;

    /// Save or replace the doctor contact of an existing patient.
    fn save_doctor_contact(&mut self, patient_id: &str, contact: &DoctorContact) -> Result<()>;

    fn doctor_contact(&mut self, patient_id: &str) -> Result<Option<DoctorContact>>;
}

/// Register `form` and store it, retrying on a generated-id collision.
pub fn register_patient<R: PatientRepository + ?Sized>(
    repo: &mut R,
    form: NewPatient,
    now: DateTime<Utc>,
) -> Result<Patient> {
    let explicit_id = form.patient_id.is_some();
    let mut patient = form.register(now)?;
    if repo.find_by_email(&patient.email)?.is_some() {
        return Err(anyhow!("a patient with email {} already exists", patient.email));
    }
    for _ in 0..8 {
        if repo.find_by_id(&patient.patient_id)?.is_none() {
            repo.save(&patient)?;
            return Ok(patient);
        }
        if explicit_id {
            break;
        }
        patient.patient_id = generate_patient_id();
    }
    Err(anyhow!("patient id {} already exists", patient.patient_id))
}

#[derive(Default)]
pub struct InMemoryPatientRepository {
    patients: BTreeMap<String, Patient>,
    doctors: BTreeMap<String, DoctorContact>,
}

impl InMemoryPatientRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatientRepository for InMemoryPatientRepository {
    fn save(&mut self, patient: &Patient) -> Result<()> {
        validate_patient_id(&patient.patient_id)?;
        if self.patients.contains_key(&patient.patient_id) {
            return Err(anyhow!("patient id {} already exists", patient.patient_id));
        }
        let email = patient.email.to_lowercase();
        if self.patients.values().any(|p| p.email.to_lowercase() == email) {
            return Err(anyhow!("a patient with email {} already exists", patient.email));
        }
        self.patients
            .insert(patient.patient_id.clone(), patient.clone());
        Ok(())
    }

    fn find_by_id(&mut self, patient_id: &str) -> Result<Option<Patient>> {
        Ok(self.patients.get(patient_id).cloned())
    }

    fn find_by_email(&mut self, email: &str) -> Result<Option<Patient>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .patients
            .values()
            .find(|p| p.email.to_lowercase() == email)
            .cloned())
    }

    fn search(&mut self, term: &str) -> Result<Vec<Patient>> {
        Ok(self
            .patients
            .values()
            .filter(|p| p.matches(term))
            .cloned()
            .collect())
    }

    fn record_scan(&mut self, patient_id: &str, at: DateTime<Utc>) -> Result<Patient> {
        let patient = self
            .patients
            .get_mut(patient_id)
            .ok_or_else(|| anyhow!("unknown patient {}", patient_id))?;
        patient.last_scan_date = Some(at);
        patient.total_scans += 1;
        Ok(patient.clone())
    }

    fn list(&mut self) -> Result<Vec<Patient>> {
        Ok(self.patients.values().cloned().collect())
    }

    fn save_doctor_contact(&mut self, patient_id: &str, contact: &DoctorContact) -> Result<()> {
        contact.validate()?;
        if !self.patients.contains_key(patient_id) {
            return Err(anyhow!("unknown patient {}", patient_id));
        }
        self.doctors.insert(patient_id.to_string(), contact.clone());
        Ok(())
    }

    fn doctor_contact(&mut self, patient_id: &str) -> Result<Option<DoctorContact>> {
        Ok(self.doctors.get(patient_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn form(first: &str, last: &str, email: &str) -> NewPatient {
        NewPatient {
            first_name: first.into(),
            last_name: last.into(),
            email: email.into(),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        for _ in 0..32 {
            let id = generate_patient_id();
            assert!(validate_patient_id(&id).is_ok(), "{}", id);
        }
        assert!(validate_patient_id("PT-1234abcd").is_err());
    }

    #[test]
    fn age_accounts_for_birthday() {
        let dob = NaiveDate::from_ymd_opt(1990, 6, 16).unwrap();
        let day_before = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        let birthday = NaiveDate::from_ymd_opt(2026, 6, 16).unwrap();
        assert_eq!(age_on(dob, day_before), Some(35));
        assert_eq!(age_on(dob, birthday), Some(36));
        assert_eq!(age_on(birthday, day_before), None);
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut bad = form("", " ", "no-at-sign");
        bad.phone = Some("(555) 12-34".into());
        let errors = bad.validation_errors();
        assert_eq!(
            errors,
            vec![
                "First Name is required",
                "Last Name is required",
                "Please enter a valid email address",
                "Please enter a valid phone number",
            ]
        );

        let mut ok = form("Ada", "Lovelace", "ada@example.org");
        ok.phone = Some("(555) 123-4567".into());
        assert!(ok.validation_errors().is_empty());
    }

    #[test]
    fn doctor_contact_needs_a_usable_phone_or_email() {
        let day = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        let empty = DoctorContact::new(Some("  ".into()), None, day);
        assert_eq!(empty.validation_errors(), vec!["Doctor phone or email is required"]);

        let bad = DoctorContact::new(Some("12-34".into()), Some("dr at clinic".into()), day);
        assert_eq!(bad.validation_errors().len(), 2);

        let ok = DoctorContact::new(None, Some("dr.smith@hospital.example".into()), day);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn in_memory_repository_round_trip() -> Result<()> {
        let mut repo = InMemoryPatientRepository::new();
        let mut f = form("Ada", "Lovelace", "Ada@Example.org");
        f.date_of_birth = NaiveDate::from_ymd_opt(1990, 1, 1);
        let ada = register_patient(&mut repo, f, now())?;
        assert_eq!(ada.age_on(now().date_naive()), Some(36));
        assert_eq!(ada.age_on(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()), Some(37));
        assert_eq!(ada.total_scans, 0);

        assert_eq!(repo.find_by_email("ada@example.ORG")?, Some(ada.clone()));
        assert_eq!(repo.search("love")?.len(), 1);
        assert_eq!(repo.search(&ada.patient_id.to_lowercase())?.len(), 1);
        assert!(repo.search("grace")?.is_empty());

        let scanned = repo.record_scan(&ada.patient_id, now())?;
        assert_eq!(scanned.total_scans, 1);
        assert_eq!(scanned.last_scan_date, Some(now()));
        assert!(repo.record_scan("PT-00000000", now()).is_err());

        let dup = register_patient(&mut repo, form("Other", "Person", "ada@example.org"), now());
        assert!(dup.is_err());
        Ok(())
    }
}
