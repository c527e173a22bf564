use super::{MappingRegistry, Stage, StageMapping};
use crate::core::error::PipelineError;
use crate::core::tables::{DatasetTier, TableCatalog};

/// Surveys cleaned column-wise, then row-wise, keyed by logical name.
const CLEANED_ENTITIES: &[&str] = &[
    "MODULE1_V1",
    "MODULE1_V2",
    "MODULE2_V1",
    "MODULE2_V2",
    "MODULE3",
    "MODULE4",
    "BIOSURVEY",
    "CLINICALBIOSURVEY",
    "COVID19SURVEY",
    "MOUTHWASH",
    "BIOSPECIMEN",
    "PARTICIPANTS",
    "EXPERIENCE2024",
];

/// Sources whose column cleaning writes straight into the clean tier.
const DIRECT_TO_CLEAN: &[&str] = &["MENSTRUALSURVEY"];

/// Single-version entities whose row cleaning produces the final table.
/// Versioned modules stay in staging for the merge stage.
const ROWS_TO_CLEAN: &[(&str, &str)] = &[
    ("MODULE3", "MODULE3"),
    ("MODULE4", "MODULE4"),
    ("BIOSURVEY", "BIOSURVEY"),
    ("CLINICALBIOSURVEY", "CLINICALBIOSURVEY"),
    ("COVID19SURVEY", "COVID19SURVEY"),
    ("MOUTHWASH", "MOUTHWASH"),
    ("BIOSPECIMEN", "BIOSPECIMEN"),
    ("PARTICIPANTS", "PARTICIPANTS"),
    ("EXPERIENCE2024", "EXPERIENCE2024"),
];

/// Versioned modules merged into one canonical table.
const MERGED_VERSIONS: &[(&[&str], &str)] = &[
    (&["MODULE1_V1", "MODULE1_V2"], "MODULE1"),
    (&["MODULE2_V1", "MODULE2_V2"], "MODULE2"),
];

/// clean_columns -> clean_rows -> merge_table_versions.
pub fn standard_registry(catalog: &TableCatalog) -> Result<MappingRegistry, PipelineError> {
    let mut clean_columns = Stage::new("clean_columns", "clean_columns").with_description(
        "Clean columns in survey tables, e.g. coalesce redundant columns and standardize names",
    );
    for entity in CLEANED_ENTITIES {
        let source = catalog.get(DatasetTier::Source, entity)?;
        let destination =
            catalog.get(DatasetTier::Staging, &format!("{}_CLEANED_COLUMNS", entity))?;
        clean_columns = clean_columns
            .with_mapping(StageMapping::new(source.clone(), destination.clone()).named(*entity));
    }
    for entity in DIRECT_TO_CLEAN {
        let source = catalog.get(DatasetTier::Source, entity)?;
        let destination = catalog.get(DatasetTier::Clean, entity)?;
        clean_columns = clean_columns
            .with_mapping(StageMapping::new(source.clone(), destination.clone()).named(*entity));
    }

    let mut clean_rows = Stage::new("clean_rows", "clean_rows")
        .with_description("Clean rows, e.g. make sure binary questions carry yes/no concept ids");
    for entity in CLEANED_ENTITIES {
        let key = format!("{}_CLEANED_COLUMNS", entity);
        let source = catalog.get(DatasetTier::Staging, &key)?;
        let destination = match ROWS_TO_CLEAN.iter().find(|(from, _)| from == entity) {
            Some((_, clean)) => catalog.get(DatasetTier::Clean, clean)?,
            None => catalog.get(DatasetTier::Staging, &format!("{}_CLEANED_ROWS", entity))?,
        };
        clean_rows =
            clean_rows.with_mapping(StageMapping::new(source.clone(), destination.clone()).named(key));
    }

    let mut merge = Stage::new("merge_table_versions", "merge_table_versions").with_description(
        "Merge survey table versions with a full outer join, coalescing common columns",
    );
    for (versions, clean) in MERGED_VERSIONS {
        let sources = versions
            .iter()
            .map(|version| {
                catalog
                    .get(DatasetTier::Staging, &format!("{}_CLEANED_ROWS", version))
                    .cloned()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let destination = catalog.get(DatasetTier::Clean, clean)?;
        merge = merge.with_mapping(StageMapping::new(sources, destination.clone()));
    }

    Ok(MappingRegistry::new(vec![clean_columns, clean_rows, merge]))
}

/// Single fix_loop_variables stage over every staged survey.
pub fn loop_variables_registry(catalog: &TableCatalog) -> Result<MappingRegistry, PipelineError> {
    let mut stage = Stage::new("fix_loop_variables", "fix_loop_variables")
        .with_description("Fix loop variables in survey tables");
    for entity in CLEANED_ENTITIES {
        let source = catalog.get(DatasetTier::Source, entity)?;
        let destination =
            catalog.get(DatasetTier::Staging, &format!("{}_FIXED_LOOP_VARIABLES", entity))?;
        stage = stage.with_mapping(StageMapping::new(source.clone(), destination.clone()).named(*entity));
    }
    Ok(MappingRegistry::new(vec![stage]))
}
