use std::collections::HashMap;

use crate::domain::Granularity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    Continent,
    Country,
    Region,
    Lineage,
    Protein,
}

impl From<Granularity> for DimensionKind {
    fn from(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Continent => DimensionKind::Continent,
            Granularity::Country => DimensionKind::Country,
            Granularity::Region => DimensionKind::Region,
        }
    }
}

#[derive(Debug, Default)]
struct Dimension {
    ids: HashMap<String, u32>,
    names: Vec<String>,
    parents: Vec<Option<u32>>,
}

impl Dimension {
    fn intern(&mut self, name: &str, parent: Option<u32>) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.parents.push(parent);
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationIds {
    pub continent: u32,
    pub country: Option<u32>,
    pub region: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationEntry<'a> {
    pub granularity: Granularity,
    pub id: u32,
    pub name: &'a str,
    pub path: &'a str,
    pub parent: Option<u32>,
}

// Countries and regions are keyed by full path.
#[derive(Debug, Default)]
pub struct Interner {
    continents: Dimension,
    countries: Dimension,
    regions: Dimension,
    lineages: Dimension,
    proteins: Dimension,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_for(&mut self, kind: DimensionKind, name: &str) -> u32 {
        self.dimension_mut(kind).intern(name, None)
    }

    pub fn lineage_id(&mut self, name: &str) -> u32 {
        self.lineages.intern(name, None)
    }

    pub fn protein_id(&mut self, name: &str) -> u32 {
        self.proteins.intern(name, None)
    }

    pub fn location_ids(
        &mut self,
        continent: &str,
        country: Option<&str>,
        region: Option<&str>,
    ) -> LocationIds {
        let continent_id = self.continents.intern(continent, None);
        let Some(country) = country else {
            return LocationIds {
                continent: continent_id,
                country: None,
                region: None,
            };
        };

        let country_path = format!("{continent}/{country}");
        let country_id = self.countries.intern(&country_path, Some(continent_id));
        let region_id = region.map(|region| {
            let region_path = format!("{country_path}/{region}");
            self.regions.intern(&region_path, Some(country_id))
        });

        LocationIds {
            continent: continent_id,
            country: Some(country_id),
            region: region_id,
        }
    }

    pub fn len(&self, kind: DimensionKind) -> usize {
        self.dimension(kind).names.len()
    }

    pub fn names(&self, kind: DimensionKind) -> &[String] {
        &self.dimension(kind).names
    }

    pub fn locations(&self) -> impl Iterator<Item = LocationEntry<'_>> {
        Granularity::ALL.into_iter().flat_map(move |granularity| {
            let dimension = self.dimension(granularity.into());
            dimension
                .names
                .iter()
                .zip(dimension.parents.iter())
                .enumerate()
                .map(move |(id, (path, parent))| LocationEntry {
                    granularity,
                    id: id as u32,
                    name: path.rsplit('/').next().unwrap_or(path),
                    path,
                    parent: *parent,
                })
        })
    }

    fn dimension(&self, kind: DimensionKind) -> &Dimension {
        match kind {
            DimensionKind::Continent => &self.continents,
            DimensionKind::Country => &self.countries,
            DimensionKind::Region => &self.regions,
            DimensionKind::Lineage => &self.lineages,
            DimensionKind::Protein => &self.proteins,
        }
    }

    fn dimension_mut(&mut self, kind: DimensionKind) -> &mut Dimension {
        match kind {
            DimensionKind::Continent => &mut self.continents,
            DimensionKind::Country => &mut self.countries,
            DimensionKind::Region => &mut self.regions,
            DimensionKind::Lineage => &mut self.lineages,
            DimensionKind::Protein => &mut self.proteins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_per_kind() {
        let mut interner = Interner::new();
        assert_eq!(interner.lineage_id("BA.2"), 0);
        assert_eq!(interner.lineage_id("BA.5"), 1);
        assert_eq!(interner.lineage_id("BA.2"), 0);
        assert_eq!(interner.protein_id("Spike"), 0);
        assert_eq!(interner.id_for(DimensionKind::Protein, "N"), 1);
        assert_eq!(interner.len(DimensionKind::Lineage), 2);
        assert_eq!(interner.names(DimensionKind::Lineage), ["BA.2", "BA.5"]);
    }

    #[test]
    fn location_hierarchy_records_parents() {
        let mut interner = Interner::new();
        let lombardy = interner.location_ids("Europe", Some("Italy"), Some("Lombardy"));
        let texas = interner.location_ids("North America", Some("USA"), Some("Texas"));
        let italy = interner.location_ids("Europe", Some("Italy"), None);

        assert_eq!(lombardy.continent, 0);
        assert_eq!(texas.continent, 1);
        assert_eq!(italy.country, lombardy.country);
        assert_eq!(italy.region, None);
        let parent = |granularity: Granularity, id: Option<u32>| {
            interner
                .locations()
                .find(|entry| entry.granularity == granularity && Some(entry.id) == id)
                .and_then(|entry| entry.parent)
        };
        assert_eq!(parent(Granularity::Region, texas.region), texas.country);
        assert_eq!(parent(Granularity::Country, lombardy.country), Some(0));
        assert_eq!(parent(Granularity::Continent, Some(0)), None);
    }

    #[test]
    fn same_region_name_in_different_countries_is_distinct() {
        let mut interner = Interner::new();
        let a = interner.location_ids("Europe", Some("Spain"), Some("Valencia"));
        let b = interner.location_ids("South America", Some("Venezuela"), Some("Valencia"));
        assert_ne!(a.region, b.region);

        let entries: Vec<_> = interner
            .locations()
            .filter(|entry| entry.granularity == Granularity::Region)
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Valencia");
        assert_eq!(entries[1].path, "South America/Venezuela/Valencia");
    }

    #[test]
    fn region_without_country_is_dropped() {
        let mut interner = Interner::new();
        let ids = interner.location_ids("Asia", None, Some("Somewhere"));
        assert_eq!(ids.country, None);
        assert_eq!(ids.region, None);
        assert_eq!(interner.len(DimensionKind::Region), 0);
    }
}
