//! Property tests for identity mapping determinism.
//!
//! For any mapping table, including ones with repeated source users, every
//! source user resolves to the destination user from its last row.

use proptest::prelude::*;
use std::collections::HashMap;
use trackmig_core::{DestUserId, MappingColumns, SourceUserId, UserMapping};

fn rows() -> impl Strategy<Value = Vec<(String, String)>> {
    // small source alphabet to force duplicates
    prop::collection::vec(("[a-e]{1,2}", "[a-z0-9.]{1,8}"), 0..40)
}

fn to_csv(rows: &[(String, String)]) -> String {
    let mut csv = String::from("source_user,dest_user\n");
    for (source, dest) in rows {
        csv.push_str(source);
        csv.push(',');
        csv.push_str(dest);
        csv.push('\n');
    }
    csv
}

proptest! {
    #[test]
    fn last_occurrence_wins(rows in rows()) {
        let mapping = UserMapping::from_reader(to_csv(&rows).as_bytes(), &MappingColumns::default())
            .unwrap();

        let mut expected: HashMap<&str, &str> = HashMap::new();
        for (source, dest) in &rows {
            expected.insert(source, dest);
        }

        prop_assert_eq!(mapping.len(), expected.len());
        prop_assert_eq!(mapping.duplicates(), rows.len() - expected.len());
        for (source, dest) in expected {
            prop_assert_eq!(
                mapping.resolve(&SourceUserId::new(source)),
                Some(&DestUserId::new(dest))
            );
        }
    }

    #[test]
    fn csv_and_pairs_agree(rows in rows()) {
        let from_csv = UserMapping::from_reader(to_csv(&rows).as_bytes(), &MappingColumns::default())
            .unwrap();
        let from_pairs = UserMapping::from_pairs(rows.iter().map(|(s, d)| (s.as_str(), d.as_str())));

        for (source, _) in &rows {
            let user = SourceUserId::new(source.as_str());
            prop_assert_eq!(from_csv.resolve(&user), from_pairs.resolve(&user));
        }
    }
}
