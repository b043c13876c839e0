//! Contact details found in transcribed packaging text.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

pub const NO_CONTACTS: &str = "No contact info found";

struct Patterns {
    toll_free: Regex,
    email: Regex,
    fssai: Regex,
    long_number: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // 1800 425 444 444, 1900 123 456 789
        toll_free: Regex::new(r"\b1[89]00(?:\s\d{3}){3}\b").expect("toll-free pattern"),
        email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email pattern"),
        // FSSAI licence numbers are exactly 14 digits
        fssai: Regex::new(r"\b\d{14}\b").expect("fssai pattern"),
        long_number: Regex::new(r"\b\d{10,}\b").expect("long number pattern"),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contacts {
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub fssai: Vec<String>,
    /// Long digit runs that are neither FSSAI numbers nor toll-free numbers.
    pub other_numbers: Vec<String>,
}

impl Contacts {
    pub fn classify(text: &str) -> Self {
        let p = patterns();
        let text = text.trim();
        let all = |re: &Regex| -> Vec<String> { re.find_iter(text).map(|m| m.as_str().to_string()).collect() };

        let phones = all(&p.toll_free);
        let emails = all(&p.email);
        let fssai = all(&p.fssai);

        let mut known: HashSet<String> = fssai.iter().cloned().collect();
        known.extend(
            phones
                .iter()
                .map(|m| m.chars().filter(char::is_ascii_digit).collect::<String>()),
        );
        let mut other_numbers = Vec::new();
        for number in all(&p.long_number) {
            if known.insert(number.clone()) {
                other_numbers.push(number);
            }
        }

        Self {
            phones,
            emails,
            fssai,
            other_numbers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phones.is_empty() && self.emails.is_empty() && self.fssai.is_empty() && self.other_numbers.is_empty()
    }

    /// One-line summary, e.g. `FSSAI Found: 10012345678901 | Email Found: care@itc.in`.
    pub fn summary(&self) -> String {
        let sections = [
            ("FSSAI Found", &self.fssai),
            ("Phone Found", &self.phones),
            ("Email Found", &self.emails),
            ("Other Numbers", &self.other_numbers),
        ];
        let parts: Vec<String> = sections
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(label, values)| format!("{}: {}", label, values.join(", ")))
            .collect();
        if parts.is_empty() {
            NO_CONTACTS.to_string()
        } else {
            parts.join(" | ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_kind() {
        let text = "Mfd by ITC Ltd. FSSAI Lic. No. 10012345678901. Call 1800 425 444 444 \
                    or write to care@itcportal.com. Batch 9876543210.";
        let contacts = Contacts::classify(text);
        assert_eq!(contacts.fssai, ["10012345678901"]);
        assert_eq!(contacts.phones, ["1800 425 444 444"]);
        assert_eq!(contacts.emails, ["care@itcportal.com"]);
        assert_eq!(contacts.other_numbers, ["9876543210"]);
        assert_eq!(
            contacts.summary(),
            "FSSAI Found: 10012345678901 | Phone Found: 1800 425 444 444 | \
             Email Found: care@itcportal.com | Other Numbers: 9876543210"
        );
    }

    #[test]
    fn fssai_and_toll_free_are_not_repeated_as_other_numbers() {
        let contacts = Contacts::classify("10012345678901 1800425444444 1800 425 444 444 5551234567 5551234567");
        assert!(!contacts.other_numbers.contains(&"10012345678901".to_string()));
        assert!(!contacts.other_numbers.contains(&"1800425444444".to_string()));
        assert_eq!(contacts.other_numbers, ["5551234567"]);
    }

    #[test]
    fn nothing_found() {
        let contacts = Contacts::classify("Best before 6 months. Net wt 75 g");
        assert!(contacts.is_empty());
        assert_eq!(contacts.summary(), NO_CONTACTS);
        assert_eq!(Contacts::classify("").summary(), NO_CONTACTS);
    }
}
